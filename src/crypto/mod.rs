use std::fmt::{Debug, Display, Formatter};

use sha1::Digest;

use crate::bencoding::Value;
use crate::error::{Error, Result};

#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct Md5(pub [u8; 16]);

impl Md5 {
    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut bytes = [0; 16];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|err| Error::metadata(format!("invalid md5 \"{}\": {}", hex, err)))?;
        Ok(Self(bytes))
    }

    pub fn digest(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }
}

impl Debug for Md5 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Md5({})", hex::encode(self.0))
    }
}

impl Display for Md5 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<Value> for Md5 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let hex: String = value.try_into()?;
        Md5::from_hex(&hex)
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct Sha1(pub [u8; 20]);

impl Sha1 {
    pub const LENGTH: usize = 20;

    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut bytes = [0; Self::LENGTH];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|err| Error::metadata(format!("invalid sha1 \"{}\": {}", hex, err)))?;
        Ok(Self(bytes))
    }

    pub fn digest(data: &[u8]) -> Self {
        Self(sha1::Sha1::digest(data).into())
    }
}

impl Debug for Sha1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sha1({})", hex::encode(self.0))
    }
}

impl Display for Sha1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_of_known_input() {
        assert_eq!(
            Sha1::digest(b"hello"),
            Sha1::from_hex("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d").unwrap()
        );
    }

    #[test]
    fn md5_of_known_input() {
        assert_eq!(
            Md5::digest(b"hello"),
            Md5::from_hex("5d41402abc4b2a76b9719d911017c592").unwrap()
        );
    }

    #[test]
    fn invalid_hex_length() {
        assert!(Sha1::from_hex("abcd").is_err());
    }
}
