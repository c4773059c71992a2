use std::time::Duration;

use crate::bencoding::Value;
use crate::error::{Error, Result};
use crate::peer::Peer;

#[derive(Debug, PartialEq)]
pub struct TrackerResponse {
    pub complete: Option<usize>,
    pub incomplete: Option<usize>,
    pub interval: Duration,
    pub peers: Vec<Peer>,
}

impl TryFrom<Value> for TrackerResponse {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        if let Some(reason) = value.try_remove_entry("failure reason")? {
            let reason: String = reason.try_into()?;
            return Err(Error::TrackerFailure(reason));
        }
        let complete = match value.try_remove_entry("complete")? {
            Some(complete) => Some(complete.try_into()?),
            None => None,
        };
        let incomplete = match value.try_remove_entry("incomplete")? {
            Some(incomplete) => Some(incomplete.try_into()?),
            None => None,
        };
        let interval = value.remove_entry("interval")?.try_into()?;
        let peers = match value.remove_entry("peers")? {
            Value::String(compact) => Peer::parse_compact(&compact)?,
            peers => {
                let peers: Vec<Value> = peers.try_into()?;
                let mut result = Vec::with_capacity(peers.len());
                for peer in peers {
                    let peer = Peer::try_from(peer)?;
                    result.push(peer);
                }
                result
            }
        };
        Ok(TrackerResponse {
            complete,
            incomplete,
            interval,
            peers,
        })
    }
}
