//! HTTP(S) tracker transport (BEP 3, BEP 23)

use super::{
    AnnounceRequest, AnnounceResponse, Result, ScrapeFile, ScrapeResponse, TrackerError,
    TrackerTransport,
};
use crate::bencode::{self, Value};
use crate::metainfo::InfoHash;
use crate::peer::{self, Peer, PeerId};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const USER_AGENT: &str = concat!("bTorrent/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tracker transport using HTTP GET
#[derive(Debug, Clone)]
pub struct HttpTransport {
    announce_url: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport, optionally through an HTTP proxy given as `host:port`
    pub fn new(announce_url: Url, proxy: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy {
            let proxy_url = if proxy.contains("://") {
                proxy.to_string()
            } else {
                format!("http://{}", proxy)
            };
            builder = builder.proxy(reqwest::Proxy::http(proxy_url)?);
        }
        Ok(Self {
            announce_url,
            client: builder.build()?,
        })
    }

    async fn get(&self, url: &str) -> Result<bytes::Bytes> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::CONNECTION, "close")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl TrackerTransport for HttpTransport {
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        let url = announce_url(&self.announce_url, request);
        debug!("GET {}", url);
        let body = self.get(&url).await?;
        parse_announce_response(&body)
    }

    async fn scrape(&self, info_hashes: &[InfoHash]) -> Result<ScrapeResponse> {
        let base = scrape_url(&self.announce_url)?;
        let mut url = base.to_string();
        for (i, hash) in info_hashes.iter().enumerate() {
            let sep = if i == 0 && base.query().is_none() { '?' } else { '&' };
            let _ = write!(url, "{}info_hash={}", sep, urlencoding::encode_binary(hash.as_bytes()));
        }
        debug!("GET {}", url);
        let body = self.get(&url).await?;
        parse_scrape_response(&body)
    }
}

/// Build the full announce url with the request encoded in the query string.
///
/// Binary values are percent-encoded byte by byte, so the query is built by
/// hand rather than through `Url::query_pairs_mut`, which only takes UTF-8.
pub fn announce_url(base: &Url, request: &AnnounceRequest) -> String {
    let mut url = base.to_string();
    url.push(if base.query().is_some() { '&' } else { '?' });

    let _ = write!(
        url,
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        urlencoding::encode_binary(request.info_hash.as_bytes()),
        urlencoding::encode_binary(request.peer_id.as_bytes()),
        request.port,
        request.uploaded,
        request.downloaded,
        request.left,
    );
    if let Some(event) = request.event.as_http_param() {
        let _ = write!(url, "&event={}", event);
    }
    if request.num_want >= 0 {
        let _ = write!(url, "&numwant={}", request.num_want);
    }
    if let Some(key) = request.key {
        let _ = write!(url, "&key={:08x}", key);
    }
    if let Some(ip) = request.ip {
        let _ = write!(url, "&ip={}", ip);
    }
    url
}

/// Derive the scrape url: the last path segment `announce` becomes `scrape`
pub fn scrape_url(announce: &Url) -> Result<Url> {
    let path = announce.path();
    match path.strip_suffix("/announce") {
        Some(prefix) => {
            let mut url = announce.clone();
            url.set_path(&format!("{}/scrape", prefix));
            Ok(url)
        }
        None => Err(TrackerError::ScrapeUnsupported(
            announce.host_str().unwrap_or_default().to_string(),
        )),
    }
}

fn decode_dict(body: &[u8]) -> Result<Value> {
    let value = bencode::decode(body)?;
    if value.as_dict().is_none() {
        return Err(TrackerError::Malformed("response is not a dictionary".to_string()));
    }
    if let Some(reason) = value.get("failure reason") {
        let reason = String::from_utf8_lossy(reason.as_bytes().unwrap_or_default()).into_owned();
        return Err(TrackerError::Failure(reason));
    }
    Ok(value)
}

fn get_u32(value: &Value, key: &str) -> Result<Option<u32>> {
    match value.get(key) {
        Some(v) => v
            .as_int()
            .and_then(|i| u32::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| TrackerError::Malformed(format!("'{}' is not a valid integer", key))),
        None => Ok(None),
    }
}

/// Parse a bencoded announce response
pub fn parse_announce_response(body: &[u8]) -> Result<AnnounceResponse> {
    let value = decode_dict(body)?;

    let interval = match get_u32(&value, "min interval")? {
        Some(i) => i,
        None => get_u32(&value, "interval")?
            .ok_or_else(|| TrackerError::Malformed("missing 'interval'".to_string()))?,
    };

    let mut peers = match value.get("peers") {
        Some(Value::Bytes(compact)) => peer::parse_compact_v4(compact)?,
        Some(Value::List(list)) => list.iter().filter_map(parse_peer_dict).collect(),
        Some(_) => return Err(TrackerError::Malformed("'peers' has wrong type".to_string())),
        None => Vec::new(),
    };
    if let Some(Value::Bytes(compact)) = value.get("peers6") {
        peers.extend(peer::parse_compact_v6(compact)?);
    }

    let warning = value
        .get("warning message")
        .and_then(Value::as_bytes)
        .map(|w| String::from_utf8_lossy(w).into_owned());
    if let Some(ref w) = warning {
        warn!("Tracker warning: {}", w);
    }

    Ok(AnnounceResponse {
        interval,
        leechers: get_u32(&value, "incomplete")?.unwrap_or(0),
        seeders: get_u32(&value, "complete")?.unwrap_or(0),
        peers,
        tracker_id: value
            .get("tracker id")
            .and_then(Value::as_bytes)
            .map(<[u8]>::to_vec),
        warning,
    })
}

/// Dictionary model peer: `{ip, port, peer id}`; unusable entries are skipped
fn parse_peer_dict(entry: &Value) -> Option<Peer> {
    let ip = entry.get("ip").and_then(Value::as_str)?;
    let port = entry
        .get("port")
        .and_then(Value::as_int)
        .and_then(|p| u16::try_from(p).ok())?;
    let ip: IpAddr = match ip.parse() {
        Ok(ip) => ip,
        Err(_) => {
            debug!("Skipping peer with unresolved address {}", ip);
            return None;
        }
    };
    let mut peer = Peer::new(SocketAddr::new(ip, port));
    if let Some(id) = entry
        .get("peer id")
        .and_then(Value::as_bytes)
        .and_then(PeerId::from_slice)
    {
        peer = peer.with_peer_id(id);
    }
    Some(peer)
}

/// Parse a bencoded scrape response
pub fn parse_scrape_response(body: &[u8]) -> Result<ScrapeResponse> {
    let value = decode_dict(body)?;
    let files = value
        .get("files")
        .and_then(Value::as_dict)
        .ok_or_else(|| TrackerError::Malformed("missing 'files'".to_string()))?;

    let files = files
        .iter()
        .map(|(hash, stats)| {
            Ok(ScrapeFile {
                seeders: get_u32(stats, "complete")?.unwrap_or(0),
                completed: get_u32(stats, "downloaded")?.unwrap_or(0),
                leechers: get_u32(stats, "incomplete")?.unwrap_or(0),
                name: stats.get("name").and_then(Value::as_str).map(str::to_string),
                info_hash: InfoHash::from_slice(hash),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ScrapeResponse { files })
}
