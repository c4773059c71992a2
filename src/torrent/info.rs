use std::ops::Range;
use std::path::{Path, PathBuf};

use bit_set::BitSet;

use crate::bencoding::Value;
use crate::codec::Encoder;
use crate::crypto::Sha1;
use crate::error::{Error, Result};
use crate::torrent::file::{FileEntry, validate_segment};

/// Largest accepted piece length, since every piece is buffered in memory while it downloads.
pub const MAX_PIECE_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, PartialEq, Clone)]
pub struct Info {
    pub info_hash: Sha1,
    pub piece_size: u64,
    pub pieces: Vec<Sha1>,
    /// Suggested file name (single-file) or directory name (multi-file).
    pub name: String,
    pub files: Vec<FileEntry>,
    pub multi_file: bool,
    pub private: bool,
    /// Canonical encoding of the info dictionary, the preimage of `info_hash`.
    pub encoded: Vec<u8>,
}

impl Info {
    fn build_pieces(pieces: &[u8]) -> Result<Vec<Sha1>> {
        if pieces.len() % Sha1::LENGTH != 0 {
            return Err(Error::malformed(
                pieces.len(),
                format!("pieces length must be a multiple of {}", Sha1::LENGTH),
            ));
        }
        let all = pieces
            .chunks_exact(Sha1::LENGTH)
            .map(|chunk| {
                let mut bytes = [0; Sha1::LENGTH];
                bytes.copy_from_slice(chunk);
                Sha1(bytes)
            })
            .collect();
        Ok(all)
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }

    pub fn piece_offset(&self, piece: usize) -> u64 {
        self.piece_size * piece as u64
    }

    /// Length of a piece; every piece has `piece_size` bytes except possibly the last.
    pub fn piece_length(&self, piece: usize) -> usize {
        let piece_start = self.piece_offset(piece);
        let piece_end = (piece_start + self.piece_size).min(self.total_size());
        piece_end.saturating_sub(piece_start) as usize
    }

    /// Where `file` lives on disk below `root`.
    pub fn destination(&self, root: &Path, file: &FileEntry) -> PathBuf {
        let mut path = root.join(&self.name);
        if self.multi_file {
            path.push(file.relative_path());
        }
        path
    }

    /// Every piece of the torrent.
    pub fn all_pieces(&self) -> BitSet {
        (0..self.total_pieces()).collect()
    }

    /// Keeps only the files at `keep` (indices into `files`) and returns the
    /// pieces that must be downloaded to reconstruct them.
    pub fn select_files(&mut self, keep: &[usize]) -> Result<BitSet> {
        if let Some(index) = keep.iter().find(|&&index| index >= self.files.len()) {
            return Err(Error::InvalidSelection(format!(
                "file index {} out of range, torrent has {} files",
                index,
                self.files.len()
            )));
        }
        let mut ranges = Vec::with_capacity(keep.len());
        for (index, file) in self.files.iter_mut().enumerate() {
            file.selected = keep.contains(&index);
            if file.selected {
                ranges.push(file.range());
            }
        }

        let mut selected = BitSet::with_capacity(self.total_pieces());
        for range in merge_ranges(ranges) {
            for piece in self.pieces_in(&range) {
                selected.insert(piece);
            }
        }
        if selected.is_empty() {
            return Err(Error::InvalidSelection(
                "selection does not cover any piece".to_string(),
            ));
        }
        Ok(selected)
    }

    /// Indices of the pieces intersecting a range of the virtual file space.
    fn pieces_in(&self, range: &Range<u64>) -> Range<usize> {
        let first = (range.start / self.piece_size) as usize;
        let last = range.end.div_ceil(self.piece_size) as usize;
        first..last.min(self.total_pieces())
    }
}

/// Sorts ranges and merges the ones that overlap or touch. Empty ranges are dropped.
pub fn merge_ranges(mut ranges: Vec<Range<u64>>) -> Vec<Range<u64>> {
    ranges.retain(|range| !range.is_empty());
    ranges.sort_by_key(|range| (range.start, range.end));
    let mut merged: Vec<Range<u64>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

impl TryFrom<Value> for Info {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let encoded = value.to_bytes();
        let info_hash = Sha1::digest(&encoded);
        let piece_size: u64 = value.remove_entry("piece length")?.try_into()?;
        if piece_size == 0 {
            return Err(Error::metadata("piece length must be positive"));
        }
        if piece_size > MAX_PIECE_SIZE {
            return Err(Error::metadata(format!(
                "piece length {} exceeds {} bytes",
                piece_size, MAX_PIECE_SIZE
            )));
        }
        let pieces: Vec<u8> = value.remove_entry("pieces")?.try_into()?;
        let pieces = Info::build_pieces(&pieces)?;
        let name: String = value.remove_entry("name")?.try_into()?;
        validate_segment(&name)?;
        let private = match value.try_remove_entry("private")? {
            Some(private) => private.try_into()?,
            None => false,
        };

        let (mut files, multi_file) = if let Some(files) = value.try_remove_entry("files")? {
            let files: Vec<Value> = files.try_into()?;
            let mut result = Vec::with_capacity(files.len());
            for file in files {
                result.push(FileEntry::try_from(file)?);
            }
            if result.is_empty() {
                return Err(Error::metadata("files list must not be empty"));
            }
            (result, true)
        } else {
            // A single-file torrent is a multi-file torrent with one synthetic entry
            let length = value.remove_entry("length")?.try_into()?;
            let md5sum = match value.try_remove_entry("md5sum")? {
                Some(md5sum) => Some(md5sum.try_into()?),
                None => None,
            };
            (vec![FileEntry::new(Vec::new(), length, md5sum)], false)
        };

        let mut offset: u64 = 0;
        for file in files.iter_mut() {
            file.offset = offset;
            offset = offset
                .checked_add(file.length)
                .ok_or_else(|| Error::metadata("total size overflows"))?;
        }

        let expected_pieces = offset.div_ceil(piece_size);
        if expected_pieces != pieces.len() as u64 {
            return Err(Error::metadata(format!(
                "{} bytes in pieces of {} bytes need {} hashes, found {}",
                offset,
                piece_size,
                expected_pieces,
                pieces.len()
            )));
        }

        Ok(Info {
            info_hash,
            piece_size,
            pieces,
            name,
            files,
            multi_file,
            private,
            encoded,
        })
    }
}
