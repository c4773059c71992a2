use size::Size;
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::core::PeerId;
use crate::crypto::Sha1;

#[derive(Debug)]
pub struct TrackerRequest {
    pub announce: Url,
    pub info_hash: Sha1,
    pub peer_id: PeerId,
    /// The port number that the client is listening on. Ports reserved for BitTorrent are
    /// typically 6881-6889.
    pub port: u16,
    /// The total amount uploaded since the client sent the 'started' event.
    pub uploaded: Size,
    /// The total amount downloaded since the client sent the 'started' event.
    pub downloaded: Size,
    /// The number of bytes needed to download to be 100% complete.
    pub left: Size,
}

impl TrackerRequest {
    /// First announce of a download. It asks for the compact peer list (6 bytes per peer) and
    /// carries `event=started`.
    pub fn started(
        announce: Url,
        info_hash: Sha1,
        peer_id: PeerId,
        port: u16,
        left: Size,
    ) -> Self {
        Self {
            announce,
            info_hash,
            peer_id,
            port,
            uploaded: Size::from_bytes(0),
            downloaded: Size::from_bytes(0),
            left,
        }
    }
}

impl From<TrackerRequest> for Url {
    fn from(value: TrackerRequest) -> Self {
        let mut url = value.announce;
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}",
            url_encode(&value.info_hash.0),
            url_encode(&value.peer_id.0),
            value.port,
            value.uploaded.bytes(),
            value.downloaded.bytes(),
            value.left.bytes(),
        );
        query.push_str("&compact=1&event=started");
        // Announce URLs may carry their own parameters (e.g. a passkey)
        if let Some(existing) = url.query().filter(|existing| !existing.is_empty()) {
            query = format!("{}&{}", existing, query);
        }
        url.set_query(Some(&query));
        url
    }
}

fn url_encode(bytes: &[u8]) -> String {
    String::from_iter(byte_serialize(bytes))
}
