use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bit_set::BitSet;
use log::{debug, warn};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::message::{Block, BlockData, Message};
use crate::peer::PeerState;
use crate::storage::{PieceStore, VerifiedPiece};

/// Protocol logic of a single connection, independent of the socket.
///
/// Incoming messages update the [`PeerState`] and the shared [`PieceStore`];
/// the messages to send in response accumulate until [`take_outgoing`] is called.
/// Blocks reserved by this handler are given back to the store when it is dropped.
///
/// [`take_outgoing`]: MessageHandler::take_outgoing
pub struct MessageHandler {
    peer: String,
    store: Arc<PieceStore>,
    state: PeerState,
    /// Outstanding requests by `(piece, offset)`
    in_flight: HashMap<(usize, usize), Requested>,
    /// Pieces that failed verification or timed out with this peer
    excluded: BitSet,
    max_in_flight: usize,
    outgoing: Vec<Message>,
}

impl MessageHandler {
    pub fn new(peer: String, store: Arc<PieceStore>, max_in_flight: usize) -> Self {
        Self {
            peer,
            store,
            state: PeerState::new(),
            in_flight: HashMap::new(),
            excluded: BitSet::new(),
            max_in_flight,
            outgoing: Vec::new(),
        }
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn handshake_completed(&mut self) {
        self.state.handshake_completed = true;
    }

    pub fn take_outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    /// Handles every message except `piece`, which goes through [`block_received`].
    ///
    /// [`block_received`]: MessageHandler::block_received
    pub fn handle(&mut self, message: Message) -> Result<()> {
        match message {
            Message::KeepAlive => (),
            Message::Choke => {
                self.state.peer_choking = true;
                self.release_all();
            }
            Message::Unchoke => {
                self.state.peer_choking = false;
                self.fill_requests();
            }
            Message::Interested => self.state.peer_interested = true,
            Message::NotInterested => self.state.peer_interested = false,
            Message::Have(piece) => {
                if piece >= self.store.total_pieces() {
                    debug!("[{}] ignoring have for unknown piece {}", self.peer, piece);
                    return Ok(());
                }
                self.state.bitfield.insert(piece);
                self.update_interest();
                self.fill_requests();
            }
            Message::Bitfield(bitfield) => {
                let total = self.store.total_pieces();
                // Trailing spare bits are not pieces
                self.state.bitfield = bitfield.iter().filter(|&piece| piece < total).collect();
                self.update_interest();
                self.fill_requests();
            }
            // Nothing is uploaded, requests for data are not served
            Message::Request(block) | Message::Cancel(block) => {
                debug!("[{}] ignoring request for {:?}", self.peer, block);
            }
            Message::Piece(_) => {
                return Err(Error::Protocol(
                    "piece messages must go through block_received".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Hands a received block to the store and tops up the request pipeline.
    pub fn block_received(&mut self, block_data: BlockData) -> Result<Option<VerifiedPiece>> {
        let requested = self.in_flight.remove(&(block_data.piece, block_data.offset));
        match &requested {
            Some(requested) if requested.block.length != block_data.data.len() => {
                debug!(
                    "[{}] expected {} bytes for {:?}, got {}",
                    self.peer,
                    requested.block.length,
                    requested.block,
                    block_data.data.len()
                );
                self.excluded.insert(block_data.piece);
            }
            Some(_) => (),
            None => debug!(
                "[{}] received unrequested {:?}",
                self.peer,
                Block::from(&block_data)
            ),
        }
        let saved = self
            .store
            .save_block(block_data.piece, block_data.offset, block_data.data);
        // A stored block no longer needs its reservation and a rejected one must be
        // requested again
        if let Some(requested) = requested {
            self.store.release([&requested.block]);
        }
        let result = match saved {
            Ok(verified) => Ok(verified),
            Err(Error::HashMismatch(piece)) => {
                warn!(
                    "[{}] piece {} failed verification, requesting it elsewhere",
                    self.peer, piece
                );
                self.excluded.insert(piece);
                Ok(None)
            }
            Err(err) => Err(err),
        };
        self.update_interest();
        self.fill_requests();
        result
    }

    /// Gives back requests older than `timeout` so another peer can serve them. Their
    /// pieces are no longer asked from this peer. Returns how many were released.
    pub fn release_expired(&mut self, now: Instant, timeout: Duration) -> usize {
        let expired: Vec<_> = self
            .in_flight
            .iter()
            .filter(|(_, requested)| now.duration_since(requested.at) >= timeout)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            if let Some(requested) = self.in_flight.remove(key) {
                self.store.release([&requested.block]);
                self.excluded.insert(requested.block.piece);
            }
        }
        if !expired.is_empty() {
            warn!(
                "[{}] {} requests unanswered after {:?}",
                self.peer,
                expired.len(),
                timeout
            );
            self.fill_requests();
        }
        expired.len()
    }

    fn update_interest(&mut self) {
        let interested = self.store.wants_any(&self.state.bitfield);
        if interested != self.state.am_interested {
            self.state.am_interested = interested;
            self.outgoing.push(if interested {
                Message::Interested
            } else {
                Message::NotInterested
            });
        }
    }

    fn fill_requests(&mut self) {
        if self.state.peer_choking || !self.state.am_interested {
            return;
        }
        while self.in_flight.len() < self.max_in_flight {
            let block = match self.store.reserve_block(&self.state.bitfield, &self.excluded) {
                Some(block) => block,
                None if self.in_flight.is_empty() && !self.excluded.is_empty() => {
                    // Only pieces that failed with this peer are left, give them another go
                    self.excluded.clear();
                    match self.store.reserve_block(&self.state.bitfield, &self.excluded) {
                        Some(block) => block,
                        None => break,
                    }
                }
                None => break,
            };
            let requested = Requested {
                block,
                at: Instant::now(),
            };
            self.in_flight.insert((block.piece, block.offset), requested);
            self.outgoing.push(Message::Request(block));
        }
    }

    fn release_all(&mut self) {
        if !self.in_flight.is_empty() {
            debug!(
                "[{}] releasing {} requested blocks",
                self.peer,
                self.in_flight.len()
            );
            self.store
                .release(self.in_flight.values().map(|requested| &requested.block));
            self.in_flight.clear();
        }
    }
}

struct Requested {
    block: Block,
    at: Instant,
}

impl Drop for MessageHandler {
    fn drop(&mut self) {
        self.release_all();
    }
}
