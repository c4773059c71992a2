mod handler;
mod session;
mod state;

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

use crate::bencoding::Value;
use crate::core::PeerId;
use crate::error::{Error, Result};

pub use handler::MessageHandler;
pub use session::{Session, SessionOutcome};
pub use state::{ConnectionState, PeerState};

const COMPACT_PEER_LENGTH: usize = 6;

/// A remote peer advertised by a tracker.
///
/// Two peers are the same peer when they share host and port, whatever
/// peer id they declared.
#[derive(Debug, Clone)]
pub struct Peer {
    pub host: String,
    pub port: u16,
    pub peer_id: Option<PeerId>,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            peer_id: None,
        }
    }

    /// Parses the compact peer list: 4 bytes of IPv4 address followed by a 2 byte
    /// big-endian port for every peer.
    pub fn parse_compact(bytes: &[u8]) -> Result<Vec<Peer>> {
        if bytes.len() % COMPACT_PEER_LENGTH != 0 {
            return Err(Error::TrackerFailure(format!(
                "compact peer list of {} bytes is not a multiple of {}",
                bytes.len(),
                COMPACT_PEER_LENGTH
            )));
        }
        let peers = bytes
            .chunks_exact(COMPACT_PEER_LENGTH)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                Peer::new(ip.to_string(), port)
            })
            .collect();
        Ok(peers)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl TryFrom<Value> for Peer {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let peer_id = match value.try_remove_entry("peer id")? {
            Some(peer_id) => {
                let bytes: Vec<u8> = peer_id.try_into()?;
                PeerId::from_slice(&bytes)
            }
            None => None,
        };
        let host: String = value.remove_entry("ip")?.try_into()?;
        let port = value.remove_entry("port")?.try_into()?;
        Ok(Peer {
            host,
            port,
            peer_id,
        })
    }
}

#[cfg(test)]
pub mod tests {
    use std::collections::HashSet;

    use futures::SinkExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_stream::StreamExt;
    use tokio_util::codec::Framed;

    use super::*;
    use crate::codec::{AsyncDecoder, AsyncEncoder};
    use crate::crypto::Sha1;
    use crate::message::{BlockData, Handshake, Message, MessageCodec};

    /// Accepts one downloader, answers its handshake, then advertises every piece
    /// and unchokes it.
    pub async fn accept_downloader(
        listener: TcpListener,
        info_hash: Sha1,
        pieces: usize,
    ) -> Framed<TcpStream, MessageCodec> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let theirs = Handshake::decode(&mut socket).await.unwrap();
        assert_eq!(theirs.info_hash, info_hash);
        Handshake::new(info_hash, PeerId::random())
            .encode(&mut socket)
            .await
            .unwrap();

        let mut messages = Framed::new(socket, MessageCodec::new(1 << 16));
        messages
            .send(Message::Bitfield((0..pieces).collect()))
            .await
            .unwrap();
        messages.send(Message::Unchoke).await.unwrap();
        messages
    }

    /// Serves every piece of `content` to a single downloader. Returns the port.
    pub async fn spawn_seeder(content: Vec<u8>, piece_size: usize, info_hash: Sha1) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let pieces = content.len().div_ceil(piece_size);
            let mut messages = accept_downloader(listener, info_hash, pieces).await;
            while let Some(Ok(message)) = messages.next().await {
                if let Message::Request(block) = message {
                    let start = block.piece * piece_size + block.offset;
                    let data = content[start..start + block.length].to_vec();
                    let piece = Message::Piece(BlockData {
                        piece: block.piece,
                        offset: block.offset,
                        data,
                    });
                    if messages.send(piece).await.is_err() {
                        break;
                    }
                }
            }
        });
        port
    }

    #[test]
    fn parse_compact_peers() {
        let bytes = [192, 168, 1, 10, 0x1A, 0xE1, 10, 0, 0, 1, 0xC8, 0xD5];

        let peers = Peer::parse_compact(&bytes).unwrap();

        assert_eq!(
            peers,
            vec![Peer::new("192.168.1.10", 6881), Peer::new("10.0.0.1", 51413)]
        );
    }

    #[test]
    fn reject_truncated_compact_peers() {
        assert!(matches!(
            Peer::parse_compact(&[127, 0, 0, 1, 0x1A, 0xE1, 127]),
            Err(Error::TrackerFailure(_))
        ));
    }

    #[test]
    fn identity_ignores_peer_id() {
        let mut with_id = Peer::new("10.0.0.1", 6881);
        with_id.peer_id = Some(PeerId::random());
        let without_id = Peer::new("10.0.0.1", 6881);

        let peers: HashSet<_> = [with_id, without_id, Peer::new("10.0.0.1", 6882)]
            .into_iter()
            .collect();

        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn parse_dictionary_peer() {
        let peer_id = "-TR3000-47qm0ov7eav4";
        let value = Value::dictionary()
            .with_entry("ip", Value::string("2600:1702:6aa3:b210::72"))
            .with_entry("peer id", Value::string(peer_id))
            .with_entry("port", Value::Integer(51413));

        let peer = Peer::try_from(value).unwrap();

        assert_eq!(peer.host, "2600:1702:6aa3:b210::72");
        assert_eq!(peer.port, 51413);
        assert_eq!(peer.peer_id, PeerId::from_slice(peer_id.as_bytes()));
        assert_eq!(peer.to_string(), "[2600:1702:6aa3:b210::72]:51413");
    }
}
