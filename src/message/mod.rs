mod block;
mod handshake;
mod message;

pub use block::*;
pub use handshake::*;
pub use message::*;
