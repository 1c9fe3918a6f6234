//! The client: our identity, settings and the torrents we track

pub mod config;

pub use config::{default_config_dir, Config, NetworkConfig, ProxyConfig};

use crate::manager::{ManagerConfig, TorrentManager};
use crate::metainfo::{InfoHash, MetainfoError};
use crate::peer::PeerId;
use crate::torrent::{AnnounceParams, Torrent};
use crate::tracker::{AnnounceEvent, Tracker, TrackerError};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Port is not specified for proxy {0}")]
    MissingPort(String),

    #[error("Invalid proxy port in {0}")]
    InvalidPort(String),

    #[error("Invalid proxy address {0}")]
    InvalidAddress(String),
}

/// Check that `proxy` is a plain `host:port` usable as an HTTP proxy url
fn validate_proxy(proxy: &str) -> std::result::Result<(), ProxyError> {
    let url = Url::parse(&format!("http://{}", proxy))
        .map_err(|_| ProxyError::InvalidAddress(proxy.to_string()))?;
    if url.host_str().is_none() || url.path() != "/" || !url.username().is_empty() {
        return Err(ProxyError::InvalidAddress(proxy.to_string()));
    }
    Ok(())
}

/// Error types for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("Torrent {0} is not added")]
    UnknownTorrent(InfoHash),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Metainfo(#[from] MetainfoError),

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug)]
pub struct Client {
    peer_id: PeerId,
    config: Config,
    torrents: Vec<Torrent>,
}

impl Client {
    /// Create a client with a fresh peer id
    pub fn new(config: Config) -> Self {
        let peer_id = PeerId::generate();
        debug!("Client peer id {:?}", peer_id);
        Self {
            peer_id,
            config,
            torrents: Vec::new(),
        }
    }

    /// Create a client whose settings live in `config_dir`
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        Ok(Self::new(Config::load(config_dir)?))
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn torrents(&self) -> &[Torrent] {
        &self.torrents
    }

    pub fn torrent(&self, info_hash: InfoHash) -> Option<&Torrent> {
        self.torrents.iter().find(|t| t.info_hash() == info_hash)
    }

    pub fn torrent_mut(&mut self, info_hash: InfoHash) -> Option<&mut Torrent> {
        self.torrents.iter_mut().find(|t| t.info_hash() == info_hash)
    }

    /// Track a torrent; returns `false` if a torrent with the same info hash is already added
    pub fn add_torrent(&mut self, mut torrent: Torrent) -> Result<bool> {
        if self.torrents.contains(&torrent) {
            debug!("Torrent {} already added", torrent.info_hash());
            return Ok(false);
        }
        torrent.set_proxy(self.proxy())?;
        info!("Added torrent {} ({})", torrent.name(), torrent.info_hash());
        self.torrents.push(torrent);
        Ok(true)
    }

    /// Load a `.torrent` file and track it
    pub fn add_torrent_file<P: AsRef<Path>>(&mut self, path: P) -> Result<InfoHash> {
        let torrent = Torrent::from_file(path)?;
        let info_hash = torrent.info_hash();
        self.add_torrent(torrent)?;
        Ok(info_hash)
    }

    /// Distinct trackers across all torrents
    pub fn trackers(&self) -> Vec<&Tracker> {
        let mut seen = HashSet::new();
        self.torrents
            .iter()
            .flat_map(|t| t.trackers())
            .filter(|tracker| seen.insert(*tracker))
            .collect()
    }

    pub fn proxy(&self) -> Option<&str> {
        self.config.proxies.http.as_deref()
    }

    /// Set or clear the HTTP proxy used for trackers
    ///
    /// Accepts `host` with a separate `port`, or `host:port`; a host with no
    /// port is rejected and `None` clears the proxy. The setting is applied to
    /// every tracker and then saved; on failure both are left unchanged.
    pub fn set_proxy(&mut self, host: Option<&str>, port: Option<u16>) -> Result<()> {
        let proxy = match (host.filter(|h| !h.is_empty()), port) {
            (None, _) => None,
            (Some(host), Some(port)) => Some(format!("{}:{}", host, port)),
            (Some(host), None) => match host.rsplit_once(':') {
                Some((_, port)) if port.parse::<u16>().is_ok() => Some(host.to_string()),
                Some(_) => return Err(ProxyError::InvalidPort(host.to_string()).into()),
                None => return Err(ProxyError::MissingPort(host.to_string()).into()),
            },
        };

        if let Some(proxy) = &proxy {
            validate_proxy(proxy)?;
        }

        let previous = self.config.proxies.http.clone();
        if let Err(e) = self.apply_proxy(proxy.as_deref()) {
            self.restore_proxy(previous.as_deref());
            return Err(e);
        }
        self.config.proxies.http = proxy;
        if let Err(e) = self.config.save() {
            self.restore_proxy(previous.as_deref());
            self.config.proxies.http = previous;
            return Err(e.into());
        }

        match self.proxy() {
            Some(proxy) => info!("Using HTTP proxy {}", proxy),
            None => info!("Proxy cleared"),
        }
        Ok(())
    }

    fn apply_proxy(&mut self, proxy: Option<&str>) -> Result<()> {
        for torrent in &mut self.torrents {
            torrent.set_proxy(proxy)?;
        }
        Ok(())
    }

    /// Put every tracker back on `proxy` after a failed change
    fn restore_proxy(&mut self, proxy: Option<&str>) {
        if let Err(e) = self.apply_proxy(proxy) {
            warn!("Failed to restore tracker proxy: {}", e);
        }
    }

    /// Announce parameters filled from our identity and settings
    pub fn announce_params(&self, event: AnnounceEvent) -> AnnounceParams {
        AnnounceParams::new(event, self.peer_id, self.config.network.port)
            .num_want(self.config.network.num_want)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new(
            self.peer_id,
            self.config.network.port,
            self.config.network.num_want,
        )
    }

    /// Start downloading a torrent in a background task
    ///
    /// The torrent is handed to the manager while it runs; [`TorrentManager::stop`]
    /// gives it back and it can be re-added with [`Client::add_torrent`].
    pub fn start(&mut self, info_hash: InfoHash, config: ManagerConfig) -> Result<TorrentManager> {
        let index = self
            .torrents
            .iter()
            .position(|t| t.info_hash() == info_hash)
            .ok_or(ClientError::UnknownTorrent(info_hash))?;
        let torrent = self.torrents.remove(index);
        Ok(TorrentManager::spawn(torrent, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{encode, Value};
    use crate::metainfo::TorrentFile;

    fn torrent(name: &str, trackers: &[&str]) -> Torrent {
        let info = Value::dict()
            .with("length", 3i64)
            .with("name", name)
            .with("piece length", 16384i64)
            .with("pieces", vec![0u8; 20]);
        let tier: Vec<Value> = trackers.iter().map(|t| Value::from(*t)).collect();
        let root = Value::dict()
            .with("announce", trackers[0])
            .with("announce-list", vec![Value::from(tier)])
            .with("info", info);
        Torrent::new(TorrentFile::from_bytes(&encode(&root)).unwrap())
    }

    fn client() -> (Client, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Client::load(dir.path()).unwrap(), dir)
    }

    #[test]
    fn test_peer_id_prefix() {
        let (client, _dir) = client();
        assert!(client.peer_id().as_bytes().starts_with(b"-bT"));
    }

    #[test]
    fn test_add_torrent_ignores_duplicates() {
        let (mut client, _dir) = client();
        assert!(client
            .add_torrent(torrent("a", &["http://t1.test/announce"]))
            .unwrap());
        assert!(!client
            .add_torrent(torrent("a", &["http://t2.test/announce"]))
            .unwrap());
        assert!(client
            .add_torrent(torrent("b", &["http://t1.test/announce", "udp://t3.test:80"]))
            .unwrap());
        assert_eq!(client.torrents().len(), 2);

        let mut urls: Vec<&str> = client.trackers().iter().map(|t| t.url().as_str()).collect();
        urls.sort();
        assert_eq!(urls, vec!["http://t1.test/announce", "udp://t3.test:80"]);
    }

    #[test]
    fn test_set_proxy_forms() {
        let (mut client, dir) = client();
        client
            .add_torrent(torrent("a", &["http://t1.test/announce"]))
            .unwrap();

        client.set_proxy(Some("abc.com"), Some(123)).unwrap();
        assert_eq!(client.proxy(), Some("abc.com:123"));
        client.set_proxy(Some("abc.com:123"), None).unwrap();
        assert_eq!(client.proxy(), Some("abc.com:123"));
        assert!(client
            .trackers()
            .iter()
            .all(|t| t.proxy() == Some("abc.com:123")));

        assert!(matches!(
            client.set_proxy(Some("abc.com"), None),
            Err(ClientError::Proxy(ProxyError::MissingPort(_)))
        ));
        assert!(matches!(
            client.set_proxy(Some("abc.com:http"), None),
            Err(ClientError::Proxy(ProxyError::InvalidPort(_)))
        ));
        assert_eq!(client.proxy(), Some("abc.com:123"));

        let saved = Config::load(dir.path()).unwrap();
        assert_eq!(saved.proxies.http.as_deref(), Some("abc.com:123"));

        client.set_proxy(None, None).unwrap();
        assert_eq!(client.proxy(), None);
        assert!(client.trackers().iter().all(|t| t.proxy().is_none()));
    }

    #[test]
    fn test_invalid_proxy_is_not_saved() {
        let (mut client, dir) = client();
        client
            .add_torrent(torrent("a", &["http://t1.test/announce"]))
            .unwrap();
        client.set_proxy(Some("abc.com"), Some(123)).unwrap();

        for (host, port) in [("bad host", Some(80)), ("abc.com/path:80", None)] {
            assert!(matches!(
                client.set_proxy(Some(host), port),
                Err(ClientError::Proxy(ProxyError::InvalidAddress(_)))
            ));
        }
        assert_eq!(client.proxy(), Some("abc.com:123"));
        assert_eq!(client.trackers()[0].proxy(), Some("abc.com:123"));

        let saved = Config::load(dir.path()).unwrap();
        assert_eq!(saved.proxies.http.as_deref(), Some("abc.com:123"));

        let mut fresh = Client::load(dir.path()).unwrap();
        assert!(fresh
            .add_torrent(torrent("b", &["http://t2.test/announce"]))
            .unwrap());
    }

    #[test]
    fn test_new_torrent_gets_proxy() {
        let (mut client, _dir) = client();
        client.set_proxy(Some("proxy.test"), Some(3128)).unwrap();
        client
            .add_torrent(torrent("a", &["http://t1.test/announce"]))
            .unwrap();
        assert_eq!(client.trackers()[0].proxy(), Some("proxy.test:3128"));
    }

    #[test]
    fn test_announce_params_from_config() {
        let (client, _dir) = client();
        let params = client.announce_params(AnnounceEvent::Started);
        assert_eq!(params.port, 6881);
        assert_eq!(params.num_want, 5);
        assert_eq!(params.peer_id, client.peer_id());
    }

    #[test]
    fn test_start_unknown_torrent() {
        let (mut client, _dir) = client();
        let config = client.manager_config();
        assert!(matches!(
            client.start(InfoHash([0; 20]), config),
            Err(ClientError::UnknownTorrent(_))
        ));
    }
}
