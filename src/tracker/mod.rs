//! Tracker protocol: announce and scrape over HTTP(S) and UDP

pub mod http;
pub mod udp;

pub use http::HttpTransport;
pub use udp::{UdpConfig, UdpTransport};

use crate::bencode::BencodeError;
use crate::metainfo::InfoHash;
use crate::peer::{CompactPeersError, Peer, PeerId};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Maximum number of info hashes in a single UDP scrape request
pub const MAX_SCRAPE_TORRENTS: usize = 74;

/// Error types for tracker operations
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Tracker failure: {0}")]
    Failure(String),

    #[error("Tracker {0} is unreachable")]
    Unreachable(String),

    #[error("Unsupported tracker url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Scrape not supported by tracker {0}")]
    ScrapeUnsupported(String),

    #[error("Too many info hashes for one scrape: {0} (max 74)")]
    TooManyHashes(usize),

    #[error("Invalid tracker url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tracker returned HTTP status {0}")]
    Status(u16),

    #[error("Invalid bencode in tracker response: {0}")]
    Bencode(#[from] BencodeError),

    #[error("Malformed tracker response: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CompactPeersError> for TrackerError {
    fn from(e: CompactPeersError) -> Self {
        TrackerError::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// Announce event, numbered as in the UDP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnounceEvent {
    #[default]
    None = 0,
    Completed = 1,
    Started = 2,
    Stopped = 3,
}

impl AnnounceEvent {
    /// Value of the HTTP `event` parameter; `None` omits the parameter
    pub fn as_http_param(self) -> Option<&'static str> {
        match self {
            AnnounceEvent::None => None,
            AnnounceEvent::Completed => Some("completed"),
            AnnounceEvent::Started => Some("started"),
            AnnounceEvent::Stopped => Some("stopped"),
        }
    }
}

/// Parameters of an announce request
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: AnnounceEvent,
    pub ip: Option<Ipv4Addr>,
    pub key: Option<u32>,
    /// Number of peers wanted; -1 lets the tracker decide
    pub num_want: i32,
    pub port: u16,
}

impl AnnounceRequest {
    pub fn new(info_hash: InfoHash, peer_id: PeerId, port: u16) -> Self {
        Self {
            info_hash,
            peer_id,
            downloaded: 0,
            left: 0,
            uploaded: 0,
            event: AnnounceEvent::None,
            ip: None,
            key: None,
            num_want: -1,
            port,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnounceResponse {
    /// Seconds to wait before the next regular announce
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<Peer>,
    #[serde(skip)]
    pub tracker_id: Option<Vec<u8>>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeFile {
    pub seeders: u32,
    pub completed: u32,
    pub leechers: u32,
    pub name: Option<String>,
    pub info_hash: Option<InfoHash>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeResponse {
    pub files: Vec<ScrapeFile>,
}

/// Trait for tracker transports - allows for different implementations
#[async_trait]
pub trait TrackerTransport: Send + Sync + fmt::Debug {
    /// Announce ourselves and fetch peers
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse>;

    /// Fetch swarm statistics for the given torrents
    async fn scrape(&self, info_hashes: &[InfoHash]) -> Result<ScrapeResponse>;
}

/// One tracker announce url and the transport that talks to it
#[derive(Clone)]
pub struct Tracker {
    url: Url,
    proxy: Option<String>,
    transport: Arc<dyn TrackerTransport>,
    custom_transport: bool,
}

impl Tracker {
    /// Create a tracker, picking the transport from the url scheme
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        let transport = build_transport(&url, None)?;
        Ok(Self {
            url,
            proxy: None,
            transport,
            custom_transport: false,
        })
    }

    /// Create a tracker with an explicit transport
    pub fn with_transport(url: Url, transport: Arc<dyn TrackerTransport>) -> Self {
        Self {
            url,
            proxy: None,
            transport,
            custom_transport: true,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Route HTTP requests through `proxy` (`host:port`), or directly when `None`
    pub fn set_proxy(&mut self, proxy: Option<&str>) -> Result<()> {
        if self.proxy.as_deref() == proxy {
            return Ok(());
        }
        if !self.custom_transport {
            self.transport = build_transport(&self.url, proxy)?;
        }
        self.proxy = proxy.map(str::to_string);
        Ok(())
    }

    pub async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        debug!("Announcing {:?} to {}", request.event, self.url);
        let response = self.transport.announce(request).await?;
        debug!(
            "{} answered: {} peers, interval {}s",
            self.url,
            response.peers.len(),
            response.interval
        );
        Ok(response)
    }

    pub async fn scrape(&self, info_hashes: &[InfoHash]) -> Result<ScrapeResponse> {
        debug!("Scraping {} torrent(s) from {}", info_hashes.len(), self.url);
        self.transport.scrape(info_hashes).await
    }
}

fn build_transport(url: &Url, proxy: Option<&str>) -> Result<Arc<dyn TrackerTransport>> {
    match url.scheme() {
        "http" | "https" => Ok(Arc::new(HttpTransport::new(url.clone(), proxy)?)),
        "udp" => Ok(Arc::new(UdpTransport::new(url, UdpConfig::default())?)),
        other => Err(TrackerError::UnsupportedScheme(other.to_string())),
    }
}

impl PartialEq for Tracker {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Tracker {}

impl Hash for Tracker {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("url", &self.url.as_str())
            .field("proxy", &self.proxy)
            .finish()
    }
}
