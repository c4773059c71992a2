mod request;
mod response;

use std::collections::HashSet;

use log::{info, warn};
use size::Size;
use url::Url;

use crate::bencoding::Parser;
use crate::client::Config;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::torrent::Torrent;

pub use request::TrackerRequest;
pub use response::TrackerResponse;

/// Sends a single announce and parses the reply.
pub async fn request(request: TrackerRequest) -> Result<TrackerResponse> {
    let url = Url::from(request);
    let mut response = reqwest::get(url)
        .await
        .map_err(|err| Error::TrackerFailure(err.to_string()))?;
    if !response.status().is_success() {
        return Err(Error::TrackerFailure(format!(
            "server returned status {}",
            response.status()
        )));
    }
    let value = {
        let mut parser = Parser::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| Error::TrackerFailure(err.to_string()))?
        {
            parser.feed(&chunk)?;
        }
        parser.result()?
    };
    TrackerResponse::try_from(value)
}

/// Announces to every tracker of the torrent and collects the distinct peers.
///
/// A tracker that fails is skipped. Fails only when no tracker returned a peer.
pub async fn announce(torrent: &Torrent, config: &Config) -> Result<Vec<Peer>> {
    let left: u64 = torrent
        .info
        .files
        .iter()
        .filter(|file| file.selected)
        .map(|file| file.length)
        .sum();
    let mut seen = HashSet::new();
    let mut peers = Vec::new();
    for announce in &torrent.announce {
        if !matches!(announce.scheme(), "http" | "https") {
            warn!("skipping unsupported tracker {}", announce);
            continue;
        }
        let started = TrackerRequest::started(
            announce.clone(),
            torrent.info.info_hash,
            config.client_id,
            config.port,
            Size::from_bytes(left),
        );
        match request(started).await {
            Ok(response) => {
                info!(
                    "tracker {} returned {} peers (interval {:?})",
                    announce,
                    response.peers.len(),
                    response.interval
                );
                for peer in response.peers {
                    if seen.insert(peer.clone()) {
                        peers.push(peer);
                    }
                }
            }
            Err(err) => warn!("tracker {} failed: {}", announce, err),
        }
    }
    if peers.is_empty() {
        return Err(Error::TrackerFailure(
            "no tracker returned any peer".to_string(),
        ));
    }
    Ok(peers)
}
