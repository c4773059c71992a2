use std::{path::PathBuf, time::Duration};

use size::Size;

use crate::core::PeerId;

/// Configuration settings for a download
#[derive(Clone, Debug)]
pub struct Config {
    // Identity and Network Settings
    /// Unique identifier for this client in the swarm
    pub client_id: PeerId,
    /// Directory below which downloaded files are stored
    pub download_path: PathBuf,
    /// Port reported to trackers
    pub port: u16,

    // Request Settings
    /// Maximum number of concurrent block requests per peer
    pub max_concurrent_requests_per_peer: usize,
    /// Size of data blocks for piece transfers
    pub block_size: Size,

    // Connection Settings
    /// Timeout for establishing new connections
    pub connect_timeout: Duration,
    /// Timeout for receiving the remote handshake
    pub handshake_timeout: Duration,
    /// Time after which a silent peer is disconnected
    pub idle_peer_timeout: Duration,
    /// Interval between keep-alive messages
    pub keep_alive_interval: Duration,
    /// Connection attempts per peer before it is abandoned
    pub max_connect_attempts: usize,
    /// Pause between two connection attempts to the same peer
    pub retry_delay: Duration,
    /// Time after which an unanswered block request is given to another peer
    pub block_timeout: Duration,

    // Storage Settings
    /// Verified pieces buffered between sessions and the file writer
    pub pieces_buffer: usize,
}

#[allow(dead_code)]
impl Config {
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self.idle_peer_timeout = interval * 2;
        self
    }

    pub fn with_block_size(mut self, size: Size) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_max_concurrent_requests_per_peer(mut self, n: usize) -> Self {
        self.max_concurrent_requests_per_peer = n;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_connect_attempts(mut self, n: usize) -> Self {
        self.max_connect_attempts = n;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    pub fn with_pieces_buffer(mut self, n: usize) -> Self {
        self.pieces_buffer = n;
        self
    }

    pub fn block_size_bytes(&self) -> usize {
        self.block_size.bytes() as usize
    }
}

impl Config {
    pub fn new(download_path: PathBuf) -> Self {
        let keep_alive_interval = Duration::from_secs(120);
        Self {
            client_id: PeerId::random(),
            download_path,
            port: 6881,
            max_concurrent_requests_per_peer: 10,
            block_size: Size::from_kibibytes(16),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            idle_peer_timeout: keep_alive_interval * 2,
            keep_alive_interval,
            max_connect_attempts: 5,
            retry_delay: Duration::from_secs(1),
            block_timeout: Duration::from_secs(30),
            pieces_buffer: 16,
        }
    }
}
