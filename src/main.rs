use std::path::PathBuf;

use anyhow::{Context, anyhow};
use log::{info, warn};
use tokio::fs::File;
use tokio::sync::mpsc;

use crate::bencoding::Value;
use crate::client::{Config, Download};
use crate::codec::AsyncDecoder;
use crate::storage::FileWriter;
use crate::torrent::Torrent;

mod bencoding;
mod client;
mod codec;
mod core;
mod crypto;
mod error;
mod message;
mod peer;
mod storage;
mod torrent;
mod tracker;

const USAGE: &str = "usage: torrent-fetch <file.torrent> [download-dir] [file-index ...]";

async fn load_torrent(path: &str) -> anyhow::Result<Torrent> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("unable to open {}", path))?;
    let value = Value::decode(&mut file).await?;
    Ok(Torrent::try_from(value)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or_else(|| anyhow!(USAGE))?;
    let download_path = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let keep = args
        .map(|index| index.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| USAGE)?;

    let mut torrent = load_torrent(&path).await?;
    info!(
        "loaded {} ({} files, {} pieces, info hash {})",
        torrent.info.name,
        torrent.info.files.len(),
        torrent.info.total_pieces(),
        torrent.info.info_hash
    );
    let selected = if keep.is_empty() {
        torrent.info.all_pieces()
    } else {
        torrent.info.select_files(&keep)?
    };

    let config = Config::new(download_path);
    let peers = tracker::announce(&torrent, &config).await?;
    info!("found {} peers", peers.len());

    let (pieces_tx, pieces_rx) = mpsc::channel(config.pieces_buffer);
    let writer = FileWriter::new(&torrent.info, &config.download_path);
    let writer = tokio::spawn(writer.run(pieces_rx));
    let download = Download::new(&torrent.info, selected, config);

    let shutdown = download.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, shutting down...");
            shutdown.cancel();
        }
    });

    let result = download.run(peers, pieces_tx).await;
    let written = writer.await??;
    info!("wrote {} pieces", written);
    result
}
