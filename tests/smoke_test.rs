//! Smoke test - announces to a public tracker end-to-end
//!
//! Run with: cargo test smoke_test -- --ignored

mod common;

use btorrent::{AnnounceEvent, Client, TrackerError};
use common::*;

/// Announce a made-up torrent; any tracker answer, even a refusal, is a pass
#[tokio::test]
#[ignore] // Requires network access
async fn smoke_test_public_udp_tracker() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_torrent(
        dir.path(),
        "smoke.torrent",
        &torrent_bytes("udp://tracker.opentrackr.org:1337/announce", &[]),
    );
    let mut client = Client::load(dir.path()).unwrap();
    let info_hash = client.add_torrent_file(&path).unwrap();
    let params = client.announce_params(AnnounceEvent::Started);

    let torrent = client.torrent(info_hash).unwrap();
    let tracker = torrent.tiers()[0][0].clone();
    let request = btorrent::tracker::AnnounceRequest {
        num_want: params.num_want,
        ..btorrent::tracker::AnnounceRequest::new(info_hash, params.peer_id, params.port)
    };

    match tracker.announce(&request).await {
        Ok(response) => println!("interval {}s, {} peers", response.interval, response.peers.len()),
        Err(TrackerError::Failure(reason)) => println!("tracker refused: {}", reason),
        Err(e) => panic!("tracker did not answer: {}", e),
    }
}
