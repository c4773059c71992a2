use std::io::Write;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A trait for values that can be encoded into a byte sink.
pub trait Encoder {
    /// Encodes a value into a byte sink.
    fn encode(&self, out: &mut impl Write) -> std::io::Result<()>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer)
            .expect("writing into a Vec never fails");
        buffer
    }
}

/// A trait for messages that can be encoded into an async stream.
pub trait AsyncEncoder {
    /// Encodes a message into an async stream.
    async fn encode<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<()>;
}

/// A trait for messages that can be decoded from an async stream.
pub trait AsyncDecoder: Sized {
    /// Decodes a message from an async stream.
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self>;
}

/// A trait for messages that can be transported over a network connection.
pub trait TransportMessage {
    /// Returns the total number of bytes needed to transport this message,
    /// including any length prefixes, message IDs, and payload data.
    fn transport_bytes(&self) -> usize;
}
