use std::ops::Range;
use std::path::PathBuf;

use crate::bencoding::Value;
use crate::crypto::Md5;
use crate::error::{Error, Result};

#[derive(Debug, PartialEq, Clone)]
pub struct FileEntry {
    /// Path segments relative to the torrent root. Empty for single-file torrents.
    pub path: Vec<String>,
    pub length: u64,
    pub md5sum: Option<Md5>,
    /// Position of the first byte of this file in the concatenation of all files.
    pub offset: u64,
    pub selected: bool,
}

impl FileEntry {
    pub fn new(path: Vec<String>, length: u64, md5sum: Option<Md5>) -> Self {
        Self {
            path,
            length,
            md5sum,
            offset: 0,
            selected: true,
        }
    }

    /// Range this file covers in the virtual file space.
    pub fn range(&self) -> Range<u64> {
        self.offset..(self.offset + self.length)
    }

    pub fn relative_path(&self) -> PathBuf {
        self.path.iter().collect()
    }
}

impl TryFrom<Value> for FileEntry {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let length = value.remove_entry("length")?.try_into()?;
        let parts: Vec<Value> = value.remove_entry("path")?.try_into()?;
        let mut path = Vec::with_capacity(parts.len());
        for part in parts {
            let part: String = part.try_into()?;
            validate_segment(&part)?;
            path.push(part);
        }
        if path.is_empty() {
            return Err(Error::metadata("file path must not be empty"));
        }
        let md5sum = match value.try_remove_entry("md5sum")? {
            Some(value) => Some(value.try_into()?),
            None => None,
        };
        Ok(FileEntry::new(path, length, md5sum))
    }
}

/// Rejects segments that would escape the download directory.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
    {
        return Err(Error::metadata(format!(
            "invalid path segment \"{}\"",
            segment
        )));
    }
    Ok(())
}
