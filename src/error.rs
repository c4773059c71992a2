use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The input is not valid bencode.
    #[error("malformed encoding at byte {position}: {reason}")]
    MalformedEncoding { position: usize, reason: String },

    /// Decoded metainfo is missing fields or is internally inconsistent.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid file selection: {0}")]
    InvalidSelection(String),

    /// The remote handshake does not belong to the torrent being downloaded.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A complete piece did not hash to its expected digest. Recoverable: the
    /// piece has been reset and can be requested again.
    #[error("piece {0} failed hash verification")]
    HashMismatch(usize),

    #[error("unable to connect to {peer}: {source}")]
    ConnectionFailure {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("tracker failure: {0}")]
    TrackerFailure(String),

    /// A peer sent a frame that violates the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn malformed(position: usize, reason: impl Into<String>) -> Self {
        Self::MalformedEncoding {
            position,
            reason: reason.into(),
        }
    }

    pub fn metadata(reason: impl Into<String>) -> Self {
        Self::InvalidMetadata(reason.into())
    }

    /// Errors after which a session is worth another connection attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }
}
