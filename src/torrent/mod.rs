//! A torrent being tracked: its trackers, known peers and transfer counters

use crate::metainfo::{InfoHash, MetainfoError, TorrentFile};
use crate::peer::{Bitfield, Peer, PeerId};
use crate::tracker::{AnnounceEvent, AnnounceRequest, ScrapeFile, Tracker, TrackerError};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-announce parameters that come from the client rather than the torrent
#[derive(Debug, Clone)]
pub struct AnnounceParams {
    pub event: AnnounceEvent,
    pub peer_id: PeerId,
    pub port: u16,
    pub num_want: i32,
    pub ip: Option<Ipv4Addr>,
    pub key: Option<u32>,
}

impl AnnounceParams {
    pub fn new(event: AnnounceEvent, peer_id: PeerId, port: u16) -> Self {
        Self {
            event,
            peer_id,
            port,
            num_want: -1,
            ip: None,
            key: None,
        }
    }

    pub fn num_want(mut self, num_want: i32) -> Self {
        self.num_want = num_want;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Torrent {
    file: TorrentFile,
    peers: HashSet<Peer>,
    tiers: Vec<Vec<Tracker>>,
    bitfield: Bitfield,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub seeders: u32,
    pub leechers: u32,
    /// Seconds between regular announces, as given by the last tracker
    pub interval: u32,
    last_announce: Option<Instant>,
}

impl Torrent {
    /// Build the tracker tiers and empty transfer state for a torrent file
    ///
    /// Each `announce-list` tier is shuffled once. Trackers whose url cannot be
    /// used are skipped with a warning.
    pub fn new(file: TorrentFile) -> Self {
        let metadata = &file.metadata;
        let urls: Vec<Vec<String>> = if metadata.announce_list.iter().all(Vec::is_empty) {
            metadata.announce.iter().map(|url| vec![url.clone()]).collect()
        } else {
            metadata.announce_list.clone()
        };

        let mut rng = rand::thread_rng();
        let tiers = urls
            .into_iter()
            .map(|tier| {
                let mut trackers: Vec<Tracker> = tier
                    .iter()
                    .filter_map(|url| match Tracker::new(url) {
                        Ok(tracker) => Some(tracker),
                        Err(e) => {
                            warn!("Skipping tracker {}: {}", url, e);
                            None
                        }
                    })
                    .collect();
                trackers.shuffle(&mut rng);
                trackers
            })
            .filter(|tier| !tier.is_empty())
            .collect();

        let info = &metadata.info;
        Self {
            bitfield: Bitfield::new(info.pieces_amount()),
            left: info.total_size,
            file,
            peers: HashSet::new(),
            tiers,
            uploaded: 0,
            downloaded: 0,
            seeders: 0,
            leechers: 0,
            interval: 0,
            last_announce: None,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MetainfoError> {
        Ok(Self::new(TorrentFile::from_file(path)?))
    }

    pub fn file(&self) -> &TorrentFile {
        &self.file
    }

    pub fn info_hash(&self) -> InfoHash {
        self.file.info_hash()
    }

    pub fn name(&self) -> String {
        let info = &self.file.metadata.info;
        if info.name.as_os_str().is_empty() {
            info.files
                .first()
                .map(|f| f.path.display().to_string())
                .unwrap_or_default()
        } else {
            info.name.display().to_string()
        }
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn peers(&self) -> &HashSet<Peer> {
        &self.peers
    }

    /// Add a peer; returns `false` if its address is already known
    pub fn add_peer(&mut self, peer: Peer) -> bool {
        self.peers.insert(peer)
    }

    pub fn tiers(&self) -> &[Vec<Tracker>] {
        &self.tiers
    }

    pub fn trackers(&self) -> impl Iterator<Item = &Tracker> {
        self.tiers.iter().flatten()
    }

    /// Route every tracker of this torrent through an HTTP proxy
    pub fn set_proxy(&mut self, proxy: Option<&str>) -> Result<(), TrackerError> {
        for tracker in self.tiers.iter_mut().flatten() {
            tracker.set_proxy(proxy)?;
        }
        Ok(())
    }

    pub fn last_announce(&self) -> Option<Instant> {
        self.last_announce
    }

    /// True when never announced or the tracker interval has elapsed
    pub fn announce_due(&self, now: Instant) -> bool {
        self.next_announce().map_or(true, |at| now >= at)
    }

    pub fn next_announce(&self) -> Option<Instant> {
        self.last_announce
            .map(|at| at + Duration::from_secs(u64::from(self.interval)))
    }

    fn tracker_order(&self) -> Vec<(usize, usize)> {
        self.tiers
            .iter()
            .enumerate()
            .flat_map(|(tier, trackers)| (0..trackers.len()).map(move |idx| (tier, idx)))
            .collect()
    }

    /// Move the tracker that answered to the front of its tier
    fn promote(&mut self, tier: usize, idx: usize) {
        let tracker = self.tiers[tier].remove(idx);
        self.tiers[tier].insert(0, tracker);
    }

    /// Announce to the first tracker that answers, walking the tiers in order
    ///
    /// Returns whether any tracker answered.
    pub async fn announce(&mut self, params: &AnnounceParams) -> bool {
        let request = AnnounceRequest {
            info_hash: self.info_hash(),
            peer_id: params.peer_id,
            downloaded: self.downloaded,
            left: self.left,
            uploaded: self.uploaded,
            event: params.event,
            ip: params.ip,
            key: params.key,
            num_want: params.num_want,
            port: params.port,
        };

        for (tier, idx) in self.tracker_order() {
            let tracker = &self.tiers[tier][idx];
            let response = match tracker.announce(&request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Announce to {} failed: {}", tracker.url(), e);
                    continue;
                }
            };
            info!(
                "{} announced to {}: {} seeders, {} leechers, {} peers",
                self.name(),
                tracker.url(),
                response.seeders,
                response.leechers,
                response.peers.len()
            );
            self.promote(tier, idx);

            self.last_announce = Some(Instant::now());
            self.interval = response.interval;
            self.seeders = response.seeders;
            self.leechers = response.leechers;
            let before = self.peers.len();
            self.peers.extend(response.peers);
            debug!("{} new peer(s)", self.peers.len() - before);
            return true;
        }
        warn!("No tracker answered for {}", self.name());
        false
    }

    /// Scrape swarm statistics from the first tracker that answers
    pub async fn scrape(&mut self) -> Option<ScrapeFile> {
        let info_hash = self.info_hash();
        for (tier, idx) in self.tracker_order() {
            let tracker = &self.tiers[tier][idx];
            match tracker.scrape(&[info_hash]).await {
                Ok(response) => {
                    let file = response
                        .files
                        .into_iter()
                        .find(|f| f.info_hash.map_or(true, |h| h == info_hash));
                    if let Some(file) = file {
                        self.promote(tier, idx);
                        self.seeders = file.seeders;
                        self.leechers = file.leechers;
                        return Some(file);
                    }
                    debug!("{} has no scrape entry for {}", tracker.url(), info_hash);
                }
                Err(e) => warn!("Scrape from {} failed: {}", tracker.url(), e),
            }
        }
        None
    }
}

impl PartialEq for Torrent {
    fn eq(&self, other: &Self) -> bool {
        self.info_hash() == other.info_hash()
    }
}

impl Eq for Torrent {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::Value;
    use crate::tracker::{AnnounceResponse, ScrapeResponse, TrackerTransport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use url::Url;

    #[derive(Debug)]
    struct FakeTransport {
        peers: Option<Vec<Peer>>,
        calls: AtomicUsize,
    }

    impl FakeTransport {
        fn answering(peers: Vec<Peer>) -> Arc<Self> {
            Arc::new(Self {
                peers: Some(peers),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                peers: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TrackerTransport for FakeTransport {
        async fn announce(
            &self,
            _request: &AnnounceRequest,
        ) -> crate::tracker::Result<AnnounceResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.peers {
                Some(peers) => Ok(AnnounceResponse {
                    interval: 1800,
                    seeders: 3,
                    leechers: 4,
                    peers: peers.clone(),
                    ..Default::default()
                }),
                None => Err(TrackerError::Unreachable("fake".into())),
            }
        }

        async fn scrape(
            &self,
            info_hashes: &[InfoHash],
        ) -> crate::tracker::Result<ScrapeResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.peers {
                Some(_) => Ok(ScrapeResponse {
                    files: vec![ScrapeFile {
                        seeders: 9,
                        completed: 1,
                        leechers: 2,
                        name: None,
                        info_hash: info_hashes.first().copied(),
                    }],
                }),
                None => Err(TrackerError::Unreachable("fake".into())),
            }
        }
    }

    fn torrent_file(announce_list: Option<Vec<Vec<&str>>>) -> TorrentFile {
        let info = Value::dict()
            .with("length", 14i64)
            .with("name", "hello.txt")
            .with("piece length", 4i64)
            .with("pieces", vec![0u8; 80]);
        let mut root = Value::dict()
            .with("announce", "http://tracker.test/announce")
            .with("info", info);
        if let Some(list) = announce_list {
            let tiers: Vec<Value> = list
                .into_iter()
                .map(|tier| Value::List(tier.into_iter().map(Value::from).collect()))
                .collect();
            root = root.with("announce-list", tiers);
        }
        TorrentFile::from_bytes(&crate::bencode::encode(&root)).unwrap()
    }

    fn fake_tracker(url: &str, transport: Arc<FakeTransport>) -> Tracker {
        Tracker::with_transport(Url::parse(url).unwrap(), transport)
    }

    fn params() -> AnnounceParams {
        AnnounceParams::new(AnnounceEvent::Started, PeerId([1; 20]), 6881)
    }

    fn peer(port: u16) -> Peer {
        Peer::new(format!("10.0.0.1:{}", port).parse().unwrap())
    }

    #[test]
    fn test_tiers_from_announce() {
        let torrent = Torrent::new(torrent_file(None));
        assert_eq!(torrent.tiers().len(), 1);
        assert_eq!(
            torrent.tiers()[0][0].url().as_str(),
            "http://tracker.test/announce"
        );
        assert_eq!(torrent.left, 14);
        assert_eq!(torrent.bitfield().len(), 4);
        assert_eq!(torrent.name(), "hello.txt");
    }

    #[test]
    fn test_tiers_from_announce_list() {
        let torrent = Torrent::new(torrent_file(Some(vec![
            vec!["http://a.test/announce", "udp://b.test:80", "wss://skip.test"],
            vec!["http://c.test/announce"],
        ])));
        assert_eq!(torrent.tiers().len(), 2);
        assert_eq!(torrent.tiers()[0].len(), 2);
        let mut first: Vec<&str> = torrent.tiers()[0].iter().map(|t| t.url().as_str()).collect();
        first.sort();
        assert_eq!(first, vec!["http://a.test/announce", "udp://b.test:80"]);
        assert_eq!(torrent.trackers().count(), 3);
    }

    #[tokio::test]
    async fn test_announce_falls_through_and_promotes() {
        let mut torrent = Torrent::new(torrent_file(None));
        let dead = FakeTransport::failing();
        let alive = FakeTransport::answering(vec![peer(1), peer(2)]);
        torrent.tiers = vec![
            vec![fake_tracker("http://dead.test/announce", dead.clone())],
            vec![
                fake_tracker("http://dead2.test/announce", FakeTransport::failing()),
                fake_tracker("http://alive.test/announce", alive.clone()),
            ],
        ];
        torrent.add_peer(peer(1));

        assert!(torrent.announce_due(Instant::now()));
        assert!(torrent.announce(&params()).await);

        assert_eq!(dead.calls.load(Ordering::SeqCst), 1);
        assert_eq!(alive.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            torrent.tiers()[1][0].url().as_str(),
            "http://alive.test/announce"
        );
        assert_eq!(torrent.peers().len(), 2);
        assert_eq!(torrent.interval, 1800);
        assert_eq!((torrent.seeders, torrent.leechers), (3, 4));
        assert!(!torrent.announce_due(Instant::now()));
        assert!(torrent.announce_due(Instant::now() + Duration::from_secs(1800)));

        // The promoted tracker is asked first next time within its tier
        assert!(torrent.announce(&params()).await);
        assert_eq!(dead.calls.load(Ordering::SeqCst), 2);
        assert_eq!(alive.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_announce_without_answer() {
        let mut torrent = Torrent::new(torrent_file(None));
        torrent.tiers = vec![vec![fake_tracker(
            "udp://dead.test:1",
            FakeTransport::failing(),
        )]];
        assert!(!torrent.announce(&params()).await);
        assert!(torrent.last_announce().is_none());
        assert!(torrent.peers().is_empty());
    }

    #[tokio::test]
    async fn test_scrape() {
        let mut torrent = Torrent::new(torrent_file(None));
        torrent.tiers = vec![vec![
            fake_tracker("http://dead.test/announce", FakeTransport::failing()),
            fake_tracker("http://alive.test/announce", FakeTransport::answering(vec![])),
        ]];
        let file = torrent.scrape().await.unwrap();
        assert_eq!(file.seeders, 9);
        assert_eq!(file.info_hash, Some(torrent.info_hash()));
        assert_eq!(torrent.seeders, 9);
        assert_eq!(
            torrent.tiers()[0][0].url().as_str(),
            "http://alive.test/announce"
        );
    }

    #[test]
    fn test_equality_by_info_hash() {
        let a = Torrent::new(torrent_file(None));
        let b = Torrent::new(torrent_file(Some(vec![vec!["http://x.test/announce"]])));
        assert_eq!(a, b);
    }
}
