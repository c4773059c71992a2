use std::sync::atomic::{AtomicUsize, Ordering};

use bit_set::BitSet;
use log::{debug, info};
use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::Result;
use crate::message::Block;
use crate::storage::piece::{Piece, VerifiedPiece};
use crate::torrent::Info;

/// Shared receipt state of every piece in a torrent.
///
/// Each piece sits behind its own lock, so sessions working on different pieces
/// never contend. Saving a block and attempting to complete its piece happen
/// under the same lock, which means a verified piece is produced exactly once.
pub struct PieceStore {
    pieces: Vec<Mutex<Piece>>,
    selected: BitSet,
    remaining: AtomicUsize,
    completed: CancellationToken,
}

impl PieceStore {
    pub fn new(info: &Info, selected: BitSet, block_size: usize) -> Self {
        let pieces: Vec<_> = info
            .pieces
            .iter()
            .enumerate()
            .map(|(index, hash)| {
                let piece = Piece::new(
                    index,
                    *hash,
                    info.piece_offset(index),
                    info.piece_length(index),
                    block_size,
                );
                Mutex::new(piece)
            })
            .collect();
        let selected: BitSet = selected
            .iter()
            .filter(|&piece| piece < pieces.len())
            .collect();
        let remaining = selected.len();
        let completed = CancellationToken::new();
        if remaining == 0 {
            completed.cancel();
        }
        Self {
            pieces,
            selected,
            remaining: AtomicUsize::new(remaining),
            completed,
        }
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_selected(&self, piece: usize) -> bool {
        self.selected.contains(piece)
    }

    pub fn is_verified(&self, piece: usize) -> bool {
        self.pieces
            .get(piece)
            .is_some_and(|piece| piece.lock().is_verified())
    }

    /// Number of selected pieces still waiting for verification.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Resolves once every selected piece has been verified.
    pub fn completed(&self) -> WaitForCancellationFuture<'_> {
        self.completed.cancelled()
    }

    /// Whether a peer owning `available` has anything left for us.
    pub fn wants_any(&self, available: &BitSet) -> bool {
        available
            .intersection(&self.selected)
            .any(|piece| !self.pieces[piece].lock().is_verified())
    }

    /// Reserves the next block to request from a peer owning `available`. Pieces in
    /// `excluded` are skipped.
    ///
    /// Pieces with blocks already received are preferred so partially downloaded
    /// pieces are finished before new ones are started.
    pub fn reserve_block(&self, available: &BitSet, excluded: &BitSet) -> Option<Block> {
        let candidates: Vec<_> = available
            .intersection(&self.selected)
            .filter(|piece| !excluded.contains(*piece))
            .collect();
        for &piece in &candidates {
            let mut guard = self.pieces[piece].lock();
            if guard.is_started() {
                if let Some(block) = guard.next_request() {
                    return Some(block);
                }
            }
        }
        candidates
            .into_iter()
            .find_map(|piece| self.pieces[piece].lock().next_request())
    }

    /// Gives reserved blocks back so they can be requested from another peer.
    pub fn release<'a>(&self, blocks: impl IntoIterator<Item = &'a Block>) {
        for block in blocks {
            if let Some(piece) = self.pieces.get(block.piece) {
                piece.lock().release(block.offset);
            }
        }
    }

    /// Stores a received block and verifies its piece when it is the last one missing.
    ///
    /// Returns the verified piece at most once per piece. A `HashMismatch` error
    /// means the piece was reset and must be downloaded again.
    pub fn save_block(
        &self,
        piece: usize,
        offset: usize,
        data: Vec<u8>,
    ) -> Result<Option<VerifiedPiece>> {
        if !self.is_selected(piece) {
            debug!("ignoring block for piece {} which was not selected", piece);
            return Ok(None);
        }
        let mut guard = self.pieces[piece].lock();
        if !guard.save_block(offset, data) {
            return Ok(None);
        }
        let verified = guard.try_complete()?;
        drop(guard);
        if verified.is_some() {
            self.piece_verified(piece);
        }
        Ok(verified)
    }

    /// Verifies a piece whose blocks are all present.
    pub fn try_complete(&self, piece: usize) -> Result<Option<VerifiedPiece>> {
        let Some(lock) = self.pieces.get(piece) else {
            return Ok(None);
        };
        let verified = lock.lock().try_complete()?;
        if verified.is_some() && self.is_selected(piece) {
            self.piece_verified(piece);
        }
        Ok(verified)
    }

    fn piece_verified(&self, piece: usize) {
        let remaining = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
        let total = self.selected.len();
        info!(
            "piece {} verified, {}/{} done ({:.1}%)",
            piece,
            total - remaining,
            total,
            ((total - remaining) as f64 / total as f64) * 100.0
        );
        if remaining == 0 {
            self.completed.cancel();
        }
    }
}
