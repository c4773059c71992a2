use bit_set::BitSet;
use log::debug;

use crate::crypto::Sha1;
use crate::error::{Error, Result};
use crate::message::Block;

/// Splits a piece of `length` bytes into blocks of `block_size` bytes. The last
/// block holds the remainder.
pub fn split_into_blocks(piece: usize, length: usize, block_size: usize) -> Vec<Block> {
    (0..length)
        .step_by(block_size)
        .map(|offset| Block::new(piece, offset, block_size.min(length - offset)))
        .collect()
}

/// A piece that passed hash verification, ready to be written at `offset` in
/// the virtual file space.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct VerifiedPiece {
    pub index: usize,
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct BlockBuffer {
    block: Block,
    data: Option<Vec<u8>>,
}

/// Receipt state of a single piece.
///
/// A piece is complete once every block is received and verified once the
/// reassembled bytes hash to the expected digest. After verification the block
/// buffers are released for good.
#[derive(Debug)]
pub struct Piece {
    index: usize,
    hash: Sha1,
    offset: u64,
    length: usize,
    blocks: Vec<BlockBuffer>,
    received: BitSet,
    requested: BitSet,
    verified: bool,
}

impl Piece {
    pub fn new(index: usize, hash: Sha1, offset: u64, length: usize, block_size: usize) -> Self {
        let blocks: Vec<_> = split_into_blocks(index, length, block_size)
            .into_iter()
            .map(|block| BlockBuffer { block, data: None })
            .collect();
        let count = blocks.len();
        Self {
            index,
            hash,
            offset,
            length,
            blocks,
            received: BitSet::with_capacity(count),
            requested: BitSet::with_capacity(count),
            verified: false,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn is_complete(&self) -> bool {
        self.verified || self.received.len() == self.blocks.len()
    }

    /// Whether any block has been received or requested.
    pub fn is_started(&self) -> bool {
        !self.received.is_empty() || !self.requested.is_empty()
    }

    pub fn is_received(&self, offset: usize) -> bool {
        self.position(offset)
            .is_some_and(|position| self.received.contains(position))
    }

    fn position(&self, offset: usize) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&offset, |buffer| buffer.block.offset)
            .ok()
    }

    /// Stores the payload of the block starting at `offset`. Returns whether it was
    /// accepted.
    ///
    /// Data for an offset that is not a block boundary, with the wrong length, or
    /// for an already verified piece is dropped silently: it can only come from a
    /// buggy or hostile peer and costs nothing but the wasted transfer.
    pub fn save_block(&mut self, offset: usize, data: Vec<u8>) -> bool {
        if self.verified {
            return false;
        }
        let Some(position) = self.position(offset) else {
            debug!("piece {}: no block at offset {}", self.index, offset);
            return false;
        };
        let buffer = &mut self.blocks[position];
        if buffer.block.length != data.len() {
            debug!(
                "piece {}: block at offset {} should be {} bytes, got {}",
                self.index,
                offset,
                buffer.block.length,
                data.len()
            );
            return false;
        }
        buffer.data = Some(data);
        self.received.insert(position);
        true
    }

    /// Verifies a complete piece. Returns `None` while blocks are missing or once the
    /// piece has already been verified.
    ///
    /// On a hash mismatch every block is reset to unreceived and `HashMismatch` is
    /// returned so the piece can be downloaded again.
    pub fn try_complete(&mut self) -> Result<Option<VerifiedPiece>> {
        if self.verified || self.received.len() < self.blocks.len() {
            return Ok(None);
        }
        let mut data = Vec::with_capacity(self.length);
        for buffer in self.blocks.iter_mut() {
            if let Some(bytes) = buffer.data.take() {
                data.extend_from_slice(&bytes);
            }
        }
        if Sha1::digest(&data) != self.hash {
            self.flush();
            return Err(Error::HashMismatch(self.index));
        }
        self.verified = true;
        self.requested.clear();
        Ok(Some(VerifiedPiece {
            index: self.index,
            offset: self.offset,
            data,
        }))
    }

    /// Discards every received block.
    pub fn flush(&mut self) {
        for buffer in self.blocks.iter_mut() {
            buffer.data = None;
        }
        self.received.clear();
        self.requested.clear();
    }

    /// Picks the first block that is neither received nor requested and marks it
    /// requested.
    pub fn next_request(&mut self) -> Option<Block> {
        if self.verified {
            return None;
        }
        let position = (0..self.blocks.len()).find(|position| {
            !self.received.contains(*position) && !self.requested.contains(*position)
        })?;
        self.requested.insert(position);
        Some(self.blocks[position].block)
    }

    /// Makes a requested block available to be requested again.
    pub fn release(&mut self, offset: usize) {
        if let Some(position) = self.position(offset) {
            self.requested.remove(position);
        }
    }
}
