mod file;
mod info;

use log::warn;
use url::Url;

use crate::bencoding::Value;
use crate::error::{Error, Result};

pub use file::FileEntry;
pub use info::{Info, merge_ranges};

// https://wiki.theory.org/BitTorrentSpecification#Metainfo_File_Structure

#[derive(Debug, PartialEq, Clone)]
pub struct Torrent {
    /// Tracker URLs in priority order: tiers of `announce-list` flattened, or the single
    /// `announce` URL.
    pub announce: Vec<Url>,
    pub info: Info,
}

impl Torrent {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Torrent::try_from(Value::from_bytes(bytes)?)
    }

    /// Metainfo dictionary with the info dictionary embedded as its original encoding.
    pub fn to_value(&self) -> Value {
        let mut value = Value::dictionary();
        if let Some(first) = self.announce.first() {
            value = value.with_entry("announce", Value::string(first.as_str()));
        }
        if self.announce.len() > 1 {
            let tiers = self.announce.iter().fold(Value::list(), |tiers, url| {
                tiers.with_value(Value::list().with_value(Value::string(url.as_str())))
            });
            value = value.with_entry("announce-list", tiers);
        }
        value.with_entry("info", Value::PreEncoded(self.info.encoded.clone()))
    }

    fn parse_announce(value: &mut Value) -> Result<Vec<Url>> {
        let mut urls = Vec::new();
        if let Some(tiers) = value.try_remove_entry("announce-list")? {
            let tiers: Vec<Value> = tiers.try_into()?;
            for tier in tiers {
                let tier: Vec<Value> = tier.try_into()?;
                for url in tier {
                    urls.push(String::try_from(url)?);
                }
            }
        }
        if let Some(announce) = value.try_remove_entry("announce")? {
            urls.push(announce.try_into()?);
        }

        let mut result: Vec<Url> = Vec::with_capacity(urls.len());
        for url in urls {
            match Url::parse(&url) {
                Ok(url) if !result.contains(&url) => result.push(url),
                Ok(_) => (),
                Err(err) => warn!("ignoring invalid announce url {}: {}", url, err),
            }
        }
        if result.is_empty() {
            return Err(Error::metadata("no valid announce url"));
        }
        Ok(result)
    }
}

impl TryFrom<Value> for Torrent {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let announce = Torrent::parse_announce(&mut value)?;
        let info = value.remove_entry("info")?.try_into()?;
        Ok(Torrent { announce, info })
    }
}
