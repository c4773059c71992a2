use std::io::ErrorKind;
use std::sync::Arc;

use futures::SinkExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;
use tokio::time::{self, Instant};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::client::Config;
use crate::codec::{AsyncDecoder, AsyncEncoder};
use crate::crypto::Sha1;
use crate::error::{Error, Result};
use crate::message::{Handshake, Message, MessageCodec};
use crate::peer::{ConnectionState, MessageHandler, Peer};
use crate::storage::{PieceStore, VerifiedPiece};

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Every selected piece has been verified.
    Completed,
    /// The peer kept failing and was given up after this many attempts.
    Abandoned { attempts: usize },
    /// The peer failed in a way a reconnect would not fix.
    Rejected(Error),
    /// The download was shut down.
    Cancelled,
}

enum Exit {
    Completed,
    Cancelled,
}

/// Downloads from a single peer, reconnecting after network failures.
pub struct Session {
    peer: Peer,
    info_hash: Sha1,
    config: Arc<Config>,
    store: Arc<PieceStore>,
    pieces_tx: Sender<VerifiedPiece>,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        peer: Peer,
        info_hash: Sha1,
        config: Arc<Config>,
        store: Arc<PieceStore>,
        pieces_tx: Sender<VerifiedPiece>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            peer,
            info_hash,
            config,
            store,
            pieces_tx,
            shutdown,
        }
    }

    pub async fn run(self) -> SessionOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = tokio::select! {
                result = self.connect_and_download() => result,
                _ = self.shutdown.cancelled() => Ok(Exit::Cancelled),
            };
            match result {
                Ok(Exit::Completed) => return SessionOutcome::Completed,
                Ok(Exit::Cancelled) => return SessionOutcome::Cancelled,
                Err(err) if !err.is_retryable() => {
                    warn!("[{}] giving up: {}", self.peer, err);
                    return SessionOutcome::Rejected(err);
                }
                Err(err) if attempts >= self.config.max_connect_attempts => {
                    warn!(
                        "[{}] abandoned after {} attempts: {}",
                        self.peer, attempts, err
                    );
                    return SessionOutcome::Abandoned { attempts };
                }
                Err(err) => {
                    info!("[{}] attempt {} failed: {}", self.peer, attempts, err);
                    tokio::select! {
                        _ = time::sleep(self.config.retry_delay) => (),
                        _ = self.shutdown.cancelled() => return SessionOutcome::Cancelled,
                    }
                }
            }
        }
    }

    async fn connect_and_download(&self) -> Result<Exit> {
        if self.store.is_complete() {
            return Ok(Exit::Completed);
        }
        let result = self.attempt().await;
        debug!("[{}] {:?}", self.peer, ConnectionState::Closed);
        result
    }

    async fn attempt(&self) -> Result<Exit> {
        let mut state = ConnectionState::Connecting;
        debug!("[{}] {:?}", self.peer, state);
        let mut socket = self.connect().await?;

        let handshake = Handshake::new(self.info_hash, self.config.client_id);
        handshake.encode(&mut socket).await?;
        state = ConnectionState::HandshakeSent;
        debug!("[{}] {:?}", self.peer, state);

        let timeout = self.config.handshake_timeout;
        let remote = time::timeout(timeout, Handshake::decode(&mut socket))
            .await
            .map_err(|_| Error::Timeout {
                operation: "handshake",
                after: timeout,
            })??;
        handshake.validate(&remote)?;
        state = ConnectionState::HandshakeValidated;
        debug!("[{}] {:?} with {:?}", self.peer, state, remote.peer_id);

        self.exchange_messages(socket).await
    }

    async fn connect(&self) -> Result<TcpStream> {
        let timeout = self.config.connect_timeout;
        let connect = TcpStream::connect((self.peer.host.as_str(), self.peer.port));
        match time::timeout(timeout, connect).await {
            Ok(Ok(socket)) => Ok(socket),
            Ok(Err(source)) => Err(Error::ConnectionFailure {
                peer: self.peer.to_string(),
                source,
            }),
            Err(_) => Err(Error::Timeout {
                operation: "connect",
                after: timeout,
            }),
        }
    }

    async fn exchange_messages(&self, socket: TcpStream) -> Result<Exit> {
        let max_length = (self.config.block_size_bytes() + 9)
            .max(self.store.total_pieces().div_ceil(8) + 1);
        let mut messages = Framed::new(socket, MessageCodec::new(max_length));
        let mut handler = MessageHandler::new(
            self.peer.to_string(),
            self.store.clone(),
            self.config.max_concurrent_requests_per_peer,
        );
        handler.handshake_completed();
        debug!("[{}] {:?}", self.peer, ConnectionState::Active);

        let keep_alive_interval = self.config.keep_alive_interval;
        let mut keep_alive =
            time::interval_at(Instant::now() + keep_alive_interval, keep_alive_interval);
        let idle_timeout = self.config.idle_peer_timeout;
        let idle = time::sleep(idle_timeout);
        tokio::pin!(idle);
        let block_timeout = self.config.block_timeout;
        let mut sweep = time::interval_at(Instant::now() + block_timeout, block_timeout);

        loop {
            tokio::select! {
                frame = messages.next() => {
                    let message = match frame {
                        Some(message) => message?,
                        None => {
                            info!("[{}] connection closed by peer", self.peer);
                            return Err(Error::Io(ErrorKind::UnexpectedEof.into()));
                        }
                    };
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                    debug!("[{}] < {:?}", self.peer, message);
                    if let Message::Piece(block_data) = message {
                        // Claim room in the writer channel first so a verified piece is never held back
                        let Ok(permit) = self.pieces_tx.reserve().await else {
                            warn!("[{}] file writer is gone", self.peer);
                            return Ok(Exit::Cancelled);
                        };
                        // Waiting on a slow writer says nothing about the peer
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                        if let Some(piece) = handler.block_received(block_data)? {
                            permit.send(piece);
                        }
                    } else {
                        handler.handle(message)?;
                    }
                    for message in handler.take_outgoing() {
                        debug!("[{}] > {:?}", self.peer, message);
                        messages.feed(message).await?;
                    }
                    messages.flush().await?;
                }
                _ = sweep.tick() => {
                    if handler.release_expired(Instant::now(), block_timeout) > 0 {
                        for message in handler.take_outgoing() {
                            debug!("[{}] > {:?}", self.peer, message);
                            messages.feed(message).await?;
                        }
                        messages.flush().await?;
                    }
                }
                _ = keep_alive.tick() => {
                    debug!("[{}] > {:?}", self.peer, Message::KeepAlive);
                    messages.send(Message::KeepAlive).await?;
                }
                _ = &mut idle => {
                    return Err(Error::Timeout {
                        operation: "waiting for peer",
                        after: idle_timeout,
                    });
                }
                _ = self.store.completed() => {
                    info!("[{}] download complete, closing", self.peer);
                    return Ok(Exit::Completed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::core::PeerId;
    use crate::peer::tests::{accept_downloader, spawn_seeder};
    use crate::torrent::tests::{test_content, test_torrent};

    fn test_config() -> Arc<Config> {
        Arc::new(
            Config::new(PathBuf::from("/tmp"))
                .with_retry_delay(Duration::ZERO)
                .with_connect_timeout(Duration::from_secs(1))
                .with_handshake_timeout(Duration::from_secs(1)),
        )
    }

    fn session(
        peer: Peer,
        content: &[u8],
        config: Arc<Config>,
    ) -> (Session, mpsc::Receiver<VerifiedPiece>) {
        let torrent = test_torrent(content, 256);
        let store = PieceStore::new(
            &torrent.info,
            torrent.info.all_pieces(),
            config.block_size_bytes(),
        );
        let (tx, rx) = mpsc::channel(config.pieces_buffer);
        let session = Session::new(
            peer,
            torrent.info.info_hash,
            config,
            Arc::new(store),
            tx,
            CancellationToken::new(),
        );
        (session, rx)
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn abandon_unreachable_peer() {
        let port = unused_port().await;
        let peer = Peer::new("127.0.0.1", port);
        let (session, _rx) = session(peer, &test_content(512), test_config());

        match session.run().await {
            SessionOutcome::Abandoned { attempts } => assert_eq!(attempts, 5),
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
    }

    #[tokio::test]
    async fn abandon_after_configured_attempts() {
        let port = unused_port().await;
        let config = Arc::new(
            Config::new(PathBuf::from("/tmp"))
                .with_retry_delay(Duration::ZERO)
                .with_max_connect_attempts(2),
        );
        let (session, _rx) = session(Peer::new("127.0.0.1", port), &test_content(512), config);

        assert!(matches!(
            session.run().await,
            SessionOutcome::Abandoned { attempts: 2 }
        ));
    }

    #[tokio::test]
    async fn unanswered_requests_are_sent_again() {
        let content = test_content(512);
        let info_hash = test_torrent(&content, 256).info.info_hash;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (repeated_tx, repeated_rx) = oneshot::channel();
        // Takes requests and never answers them
        let hoarder = tokio::spawn(async move {
            let mut messages = accept_downloader(listener, info_hash, 2).await;
            let mut requested = HashSet::new();
            let mut repeated_tx = Some(repeated_tx);
            while let Some(Ok(message)) = messages.next().await {
                if let Message::Request(block) = message {
                    if !requested.insert(block) {
                        if let Some(tx) = repeated_tx.take() {
                            let _ = tx.send(block);
                        }
                    }
                }
            }
        });
        let config = Arc::new(
            Config::new(PathBuf::from("/tmp")).with_block_timeout(Duration::from_millis(100)),
        );
        let (session, _rx) = session(Peer::new("127.0.0.1", port), &content, config);
        let shutdown = session.shutdown.clone();
        let running = tokio::spawn(session.run());

        let repeated = time::timeout(Duration::from_secs(5), repeated_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repeated.offset, 0);

        shutdown.cancel();
        assert!(matches!(running.await.unwrap(), SessionOutcome::Cancelled));
        hoarder.abort();
    }

    #[tokio::test]
    async fn slow_writer_does_not_make_peer_idle() {
        let content = test_content(512);
        let info_hash = test_torrent(&content, 256).info.info_hash;
        let port = spawn_seeder(content.clone(), 256, info_hash).await;
        let config = Arc::new(
            Config::new(PathBuf::from("/tmp"))
                .with_keep_alive_interval(Duration::from_millis(100))
                .with_pieces_buffer(1),
        );
        let (session, mut rx) = session(Peer::new("127.0.0.1", port), &content, config);
        let running = tokio::spawn(session.run());

        // The second piece waits for room in the channel well past the idle timeout
        time::sleep(Duration::from_millis(600)).await;
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        assert_eq!(first.index + second.index, 1);
        assert!(matches!(running.await.unwrap(), SessionOutcome::Completed));
    }

    #[tokio::test]
    async fn reject_wrong_info_hash() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let ours = Handshake::decode(&mut socket).await.unwrap();
            let other = Handshake::new(Sha1([0xAB; 20]), PeerId::random());
            assert_ne!(ours.info_hash, other.info_hash);
            other.encode(&mut socket).await.unwrap();
        });
        let peer = Peer::new("127.0.0.1", port);
        let (session, _rx) = session(peer, &test_content(512), test_config());

        assert!(matches!(
            session.run().await,
            SessionOutcome::Rejected(Error::HandshakeRejected(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_session_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accepts but never answers the handshake
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
        let config = Arc::new(
            Config::new(PathBuf::from("/tmp")).with_handshake_timeout(Duration::from_secs(30)),
        );
        let (session, _rx) = session(Peer::new("127.0.0.1", port), &test_content(512), config);
        let shutdown = session.shutdown.clone();
        let running = tokio::spawn(session.run());

        time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        assert!(matches!(running.await.unwrap(), SessionOutcome::Cancelled));
        silent.abort();
    }
}
