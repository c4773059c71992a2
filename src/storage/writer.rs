use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc::Receiver;

use crate::crypto::Md5;
use crate::storage::VerifiedPiece;
use crate::torrent::Info;

#[derive(Debug)]
struct FileTarget {
    path: PathBuf,
    range: Range<u64>,
    md5sum: Option<Md5>,
    selected: bool,
    written: u64,
}

/// Writes verified pieces to the files they span.
///
/// Bytes belonging to files that were not selected are dropped. Once every byte
/// of a file has been written its md5sum, when the torrent provides one, is checked.
pub struct FileWriter {
    files: Vec<FileTarget>,
}

impl FileWriter {
    pub fn new(info: &Info, root: &Path) -> Self {
        let files = info
            .files
            .iter()
            .map(|file| FileTarget {
                path: info.destination(root, file),
                range: file.range(),
                md5sum: file.md5sum,
                selected: file.selected,
                written: 0,
            })
            .collect();
        Self { files }
    }

    /// Consumes pieces until the channel closes. Returns the number of pieces written.
    pub async fn run(mut self, mut rx: Receiver<VerifiedPiece>) -> anyhow::Result<usize> {
        self.create_empty_files().await?;
        let mut count = 0;
        while let Some(piece) = rx.recv().await {
            self.write(piece).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn create_empty_files(&self) -> anyhow::Result<()> {
        for file in self.files.iter().filter(|file| file.selected) {
            if file.range.is_empty() {
                open(&file.path).await?;
            }
        }
        Ok(())
    }

    pub async fn write(&mut self, piece: VerifiedPiece) -> anyhow::Result<()> {
        let piece_range = piece.offset..(piece.offset + piece.data.len() as u64);
        for file in self.files.iter_mut() {
            let start = piece_range.start.max(file.range.start);
            let end = piece_range.end.min(file.range.end);
            if start >= end {
                continue;
            }
            if !file.selected {
                debug!(
                    "piece {}: skipping {} bytes of unselected {:?}",
                    piece.index,
                    end - start,
                    file.path
                );
                continue;
            }
            let data = &piece.data[(start - piece.offset) as usize..(end - piece.offset) as usize];
            let mut handle = open(&file.path).await?;
            handle.seek(SeekFrom::Start(start - file.range.start)).await?;
            handle.write_all(data).await?;
            handle.flush().await?;
            file.written += end - start;
            if file.written == file.range.end - file.range.start {
                file.finished().await?;
            }
        }
        Ok(())
    }
}

impl FileTarget {
    async fn finished(&self) -> anyhow::Result<()> {
        let Some(expected) = self.md5sum else {
            info!("{:?} complete", self.path);
            return Ok(());
        };
        let actual = Md5::digest(&fs::read(&self.path).await?);
        if actual == expected {
            info!("{:?} complete, md5 {}", self.path, actual);
        } else {
            warn!(
                "{:?} md5 mismatch: expected {}, found {}",
                self.path, expected, actual
            );
        }
        Ok(())
    }
}

async fn open(path: &Path) -> anyhow::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    Ok(file)
}
