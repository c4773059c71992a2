use std::fmt::{Debug, Formatter};

use rand::RngCore;

const CLIENT_PREFIX: &[u8; 8] = b"-TF0100-";

#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Azureus-style id: a fixed client prefix followed by random bytes.
    pub fn random() -> Self {
        let mut data = [0; 20];
        data[..CLIENT_PREFIX.len()].copy_from_slice(CLIENT_PREFIX);
        rand::rng().fill_bytes(&mut data[CLIENT_PREFIX.len()..]);
        Self(data)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}
