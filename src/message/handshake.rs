use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{AsyncDecoder, AsyncEncoder, TransportMessage};
use crate::core::PeerId;
use crate::crypto::Sha1;
use crate::error::{Error, Result};

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LENGTH: usize = 1 + PROTOCOL.len() + 8 + 20 + 20;

/// The handshake is a required message and must be the first message transmitted by the client. It
/// is (49+len(pstr)) bytes long.
///
/// _handshake: <pstrlen><pstr><reserved><info\_hash><peer\_id>_
///
/// * **pstrlen**: string length of <pstr>, as a single raw byte
/// * **pstr**: string identifier of the protocol
/// * **reserved**: eight (8) reserved bytes. All current implementations use all zeroes.
/// * **info\_hash**: 20-byte SHA1 hash of the info key in the metainfo file. This is the same
///   info\_hash that is transmitted in tracker requests.
/// * **peer\_id**: 20-byte string used as a unique ID for the client.
///
/// In version 1.0 of the BitTorrent protocol, pstrlen = 19, and pstr = "BitTorrent protocol",
/// which makes the handshake exactly 68 bytes long.
///
/// If a client receives a handshake with an info\_hash that it is not currently serving, then the
/// client must drop the connection.
#[derive(Debug, PartialEq, Clone)]
pub struct Handshake {
    pub info_hash: Sha1,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LENGTH] {
        let mut bytes = [0; HANDSHAKE_LENGTH];
        bytes[0] = PROTOCOL.len() as u8;
        bytes[1..20].copy_from_slice(PROTOCOL);
        // bytes[20..28] are reserved and stay zero
        bytes[28..48].copy_from_slice(&self.info_hash.0);
        bytes[48..68].copy_from_slice(&self.peer_id.0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HANDSHAKE_LENGTH]) -> Result<Self> {
        if bytes[0] as usize != PROTOCOL.len() || &bytes[1..20] != PROTOCOL {
            return Err(Error::HandshakeRejected(format!(
                "unsupported protocol {:?}",
                String::from_utf8_lossy(&bytes[1..20])
            )));
        }
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&bytes[28..48]);
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&bytes[48..68]);
        Ok(Handshake {
            info_hash: Sha1(info_hash),
            peer_id: PeerId(peer_id),
        })
    }

    /// Checks that the remote handshake is for the torrent we expect.
    pub fn validate(&self, remote: &Handshake) -> Result<()> {
        if self.info_hash != remote.info_hash {
            return Err(Error::HandshakeRejected(format!(
                "info hash mismatch: expected {}, got {}",
                self.info_hash, remote.info_hash
            )));
        }
        Ok(())
    }
}

impl AsyncDecoder for Handshake {
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let mut buf = [0; HANDSHAKE_LENGTH];
        stream.read_exact(&mut buf).await?;
        Handshake::from_bytes(&buf)
    }
}

impl AsyncEncoder for Handshake {
    async fn encode<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<()> {
        stream.write_all(&self.to_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl TransportMessage for Handshake {
    fn transport_bytes(&self) -> usize {
        HANDSHAKE_LENGTH
    }
}
