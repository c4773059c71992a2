mod config;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use bit_set::BitSet;
use log::{info, warn};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::crypto::Sha1;
use crate::peer::{Peer, Session, SessionOutcome};
use crate::storage::{PieceStore, VerifiedPiece};
use crate::torrent::Info;

pub use config::Config;

/// Downloads the selected pieces of a torrent from a set of peers.
///
/// Every peer gets its own [`Session`]. Sessions share the [`PieceStore`] and
/// hand verified pieces to the writer through a bounded channel.
pub struct Download {
    info_hash: Sha1,
    config: Arc<Config>,
    store: Arc<PieceStore>,
    shutdown: CancellationToken,
}

impl Download {
    pub fn new(info: &Info, selected: BitSet, config: Config) -> Self {
        let store = PieceStore::new(info, selected, config.block_size_bytes());
        Self {
            info_hash: info.info_hash,
            config: Arc::new(config),
            store: Arc::new(store),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling the returned token stops every session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs one session per distinct peer until every selected piece is verified or
    /// no session is left.
    pub async fn run(
        &self,
        peers: Vec<Peer>,
        pieces_tx: Sender<VerifiedPiece>,
    ) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        let mut sessions = JoinSet::new();
        for peer in peers {
            if !seen.insert(peer.clone()) {
                continue;
            }
            let session = Session::new(
                peer.clone(),
                self.info_hash,
                self.config.clone(),
                self.store.clone(),
                pieces_tx.clone(),
                self.shutdown.clone(),
            );
            sessions.spawn(async move { (peer, session.run().await) });
        }
        drop(pieces_tx);
        info!(
            "downloading {} pieces from {} peers",
            self.store.remaining(),
            sessions.len()
        );

        while let Some(joined) = sessions.join_next().await {
            match joined {
                Ok((peer, SessionOutcome::Completed)) => info!("[{}] session completed", peer),
                Ok((peer, SessionOutcome::Cancelled)) => info!("[{}] session cancelled", peer),
                Ok((peer, SessionOutcome::Abandoned { attempts })) => {
                    warn!("[{}] abandoned after {} attempts", peer, attempts)
                }
                Ok((peer, SessionOutcome::Rejected(err))) => warn!("[{}] rejected: {}", peer, err),
                Err(err) => warn!("session task failed: {}", err),
            }
        }

        if self.store.is_complete() {
            info!("all pieces verified");
            Ok(())
        } else if self.shutdown.is_cancelled() {
            Err(anyhow!(
                "download cancelled with {} pieces remaining",
                self.store.remaining()
            ))
        } else {
            Err(anyhow!(
                "all peers exhausted with {} pieces remaining",
                self.store.remaining()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use size::Size;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;
    use crate::peer::tests::spawn_seeder;
    use crate::torrent::tests::{test_content, test_torrent};

    const PIECE_SIZE: usize = 1024;

    fn test_config() -> Config {
        Config::new(PathBuf::from("/tmp"))
            .with_block_size(Size::from_bytes(256))
            .with_max_concurrent_requests_per_peer(4)
            .with_retry_delay(Duration::ZERO)
            .with_connect_timeout(Duration::from_secs(1))
            .with_pieces_buffer(2)
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn download_from_seeder_despite_dead_peer() {
        let content = test_content(3000);
        let torrent = test_torrent(&content, PIECE_SIZE);
        let seeder = spawn_seeder(content.clone(), PIECE_SIZE, torrent.info.info_hash).await;
        let dead = unused_port().await;
        let config = test_config();
        let (tx, mut rx) = mpsc::channel(config.pieces_buffer);
        let download = Download::new(&torrent.info, torrent.info.all_pieces(), config);
        let collector = tokio::spawn(async move {
            let mut pieces = Vec::new();
            while let Some(piece) = rx.recv().await {
                pieces.push(piece);
            }
            pieces
        });

        download
            .run(
                vec![
                    Peer::new("127.0.0.1", dead),
                    Peer::new("127.0.0.1", seeder),
                    Peer::new("127.0.0.1", seeder),
                ],
                tx,
            )
            .await
            .unwrap();

        let mut pieces = collector.await.unwrap();
        pieces.sort_by_key(|piece| piece.index);
        assert_eq!(
            pieces.iter().map(|piece| piece.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        let downloaded: Vec<u8> = pieces.into_iter().flat_map(|piece| piece.data).collect();
        assert_eq!(downloaded, content);
    }

    #[tokio::test]
    async fn fail_when_all_peers_are_exhausted() {
        let content = test_content(3000);
        let torrent = test_torrent(&content, PIECE_SIZE);
        let download = Download::new(&torrent.info, torrent.info.all_pieces(), test_config());
        let (tx, _rx) = mpsc::channel(2);

        let result = download
            .run(
                vec![
                    Peer::new("127.0.0.1", unused_port().await),
                    Peer::new("127.0.0.1", unused_port().await),
                ],
                tx,
            )
            .await;

        assert_eq!(
            result.unwrap_err().to_string(),
            "all peers exhausted with 3 pieces remaining"
        );
    }

    #[tokio::test]
    async fn shutdown_stops_sessions() {
        let content = test_content(3000);
        let torrent = test_torrent(&content, PIECE_SIZE);
        // Accepts connections and never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let silent = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });
        let download = Download::new(&torrent.info, torrent.info.all_pieces(), test_config());
        let shutdown = download.shutdown_token();
        let (tx, _rx) = mpsc::channel(2);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.cancel();
        });

        let result = download.run(vec![Peer::new("127.0.0.1", port)], tx).await;

        assert!(result.unwrap_err().to_string().contains("cancelled"));
        silent.abort();
    }
}
