use bit_set::BitSet;

/// Stages of a single connection to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    HandshakeSent,
    HandshakeValidated,
    Active,
    Closed,
}

/// Per-connection protocol flags and the pieces the remote claims to have.
#[derive(Debug)]
pub struct PeerState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
    pub handshake_completed: bool,
    pub bitfield: BitSet,
}

impl PeerState {
    pub fn new() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            handshake_completed: false,
            bitfield: BitSet::new(),
        }
    }
}

impl Default for PeerState {
    fn default() -> Self {
        Self::new()
    }
}
