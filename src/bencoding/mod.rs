//! Bencode, the serialization format of metainfo files and tracker responses.
//!
//! https://wiki.theory.org/BitTorrentSpecification#Bencoding

mod decoder;
mod encoder;
pub mod value;

pub use decoder::Parser;
pub use value::Value;
