//! btorrent - a small BitTorrent client
//!
//! Bencode, `.torrent` metainfo, HTTP and UDP trackers, and the peer wire
//! protocol, tied together by a [`Client`] that runs each torrent in a
//! background [`TorrentManager`].

pub mod bencode;
pub mod cli;
pub mod client;
pub mod manager;
pub mod metainfo;
pub mod peer;
pub mod torrent;
pub mod tracker;
pub mod wire;

// Re-export commonly used types
pub use client::{Client, ClientError, Config};
pub use manager::{ManagerConfig, ManagerStatus, TorrentManager};
pub use metainfo::{InfoHash, TorrentFile, TorrentMetadata};
pub use peer::{Peer, PeerId};
pub use torrent::{AnnounceParams, Torrent};
pub use tracker::{AnnounceEvent, Tracker, TrackerError};
