//! Announce and scrape against local fake trackers

mod common;

use btorrent::bencode::{encode, Value};
use btorrent::peer::PeerId;
use btorrent::tracker::{
    AnnounceEvent, AnnounceRequest, Tracker, TrackerError, UdpConfig, UdpTransport,
};
use btorrent::InfoHash;
use common::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn request() -> AnnounceRequest {
    let mut request = AnnounceRequest::new(InfoHash([0xab; 20]), PeerId([b'p'; 20]), 6881);
    request.event = AnnounceEvent::Started;
    request.left = 14;
    request.num_want = 5;
    request
}

fn udp_tracker_with(url: &str, config: UdpConfig) -> Tracker {
    let url = Url::parse(url).unwrap();
    let transport = UdpTransport::new(&url, config).unwrap();
    Tracker::with_transport(url, Arc::new(transport))
}

fn fast_udp() -> UdpConfig {
    UdpConfig {
        base_timeout: Duration::from_millis(100),
        max_retries: 2,
    }
}

#[tokio::test]
async fn test_http_announce() {
    let peers: Vec<SocketAddr> = vec!["10.1.2.3:6881".parse().unwrap(), "10.1.2.4:51413".parse().unwrap()];
    let mut fake = http_tracker(announce_body(900, &peers)).await;
    let tracker = Tracker::new(&fake.announce_url).unwrap();

    let response = tracker.announce(&request()).await.unwrap();
    assert_eq!(response.interval, 900);
    assert_eq!(response.seeders, 5);
    assert_eq!(response.leechers, 7);
    let addrs: Vec<SocketAddr> = response.peers.iter().map(|p| p.addr).collect();
    assert_eq!(addrs, peers);

    let target = fake.requests.recv().await.unwrap();
    assert!(target.starts_with("/announce?info_hash=%AB%AB"), "{}", target);
    assert!(target.contains("&peer_id=pppppppppppppppppppp"));
    assert!(target.contains("&port=6881"));
    assert!(target.contains("&left=14"));
    assert!(target.contains("&compact=1"));
    assert!(target.contains("&event=started"));
    assert!(target.contains("&numwant=5"));
}

#[tokio::test]
async fn test_http_failure_reason() {
    let body = encode(&Value::dict().with("failure reason", "torrent not registered"));
    let fake = http_tracker(body).await;
    let tracker = Tracker::new(&fake.announce_url).unwrap();

    match tracker.announce(&request()).await {
        Err(TrackerError::Failure(reason)) => assert_eq!(reason, "torrent not registered"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_http_scrape() {
    let hash = InfoHash([0xab; 20]);
    let mut files = Value::dict();
    files = files.with(
        hash.as_bytes(),
        Value::dict()
            .with("complete", 4i64)
            .with("downloaded", 10i64)
            .with("incomplete", 2i64)
            .with("name", "abc.txt"),
    );
    let mut fake = http_tracker(encode(&Value::dict().with("files", files))).await;
    let tracker = Tracker::new(&fake.announce_url).unwrap();

    let response = tracker.scrape(&[hash]).await.unwrap();
    assert_eq!(response.files.len(), 1);
    let file = &response.files[0];
    assert_eq!(file.info_hash, Some(hash));
    assert_eq!((file.seeders, file.completed, file.leechers), (4, 10, 2));
    assert_eq!(file.name.as_deref(), Some("abc.txt"));

    let target = fake.requests.recv().await.unwrap();
    assert!(target.starts_with("/scrape?info_hash="), "{}", target);
}

#[tokio::test]
async fn test_udp_announce_and_scrape() {
    let peers: Vec<SocketAddr> = vec!["10.9.8.7:6881".parse().unwrap()];
    let mut fake = udp_tracker(peers.clone(), 0).await;
    let tracker = udp_tracker_with(&fake.url, fast_udp());

    let response = tracker.announce(&request()).await.unwrap();
    assert_eq!(response.interval, 1800);
    assert_eq!((response.leechers, response.seeders), (2, 3));
    assert_eq!(response.peers.len(), 1);
    assert_eq!(response.peers[0].addr, peers[0]);

    let hashes = [InfoHash([1; 20]), InfoHash([2; 20])];
    let scrape = tracker.scrape(&hashes).await.unwrap();
    assert_eq!(scrape.files.len(), 2);
    assert_eq!(scrape.files[1].info_hash, Some(hashes[1]));
    assert_eq!(
        (scrape.files[1].seeders, scrape.files[1].completed, scrape.files[1].leechers),
        (11, 21, 31)
    );

    // The connection id is reused within its lifetime
    assert_eq!(fake.actions.recv().await, Some(0));
    assert_eq!(fake.actions.recv().await, Some(1));
    assert_eq!(fake.actions.recv().await, Some(2));
}

#[tokio::test]
async fn test_udp_retransmits_lost_datagrams() {
    let fake = udp_tracker(vec![], 2).await;
    let tracker = udp_tracker_with(&fake.url, fast_udp());

    let response = tracker.announce(&request()).await.unwrap();
    assert_eq!(response.interval, 1800);
    assert!(response.peers.is_empty());
}

#[tokio::test]
async fn test_udp_unreachable_after_retries() {
    let fake = udp_tracker(vec![], usize::MAX).await;
    let config = UdpConfig {
        base_timeout: Duration::from_millis(20),
        max_retries: 1,
    };
    let tracker = udp_tracker_with(&fake.url, config);

    assert!(matches!(
        tracker.announce(&request()).await,
        Err(TrackerError::Unreachable(_))
    ));
}

#[tokio::test]
async fn test_udp_scrape_hash_limit() {
    let fake = udp_tracker(vec![], 0).await;
    let tracker = udp_tracker_with(&fake.url, fast_udp());
    let hashes = vec![InfoHash([0; 20]); 75];

    assert!(matches!(
        tracker.scrape(&hashes).await,
        Err(TrackerError::TooManyHashes(75))
    ));
}
