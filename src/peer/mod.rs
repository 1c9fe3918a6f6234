//! Peer identity and addressing

pub mod bitfield;

pub use bitfield::{Bitfield, BitfieldError};

use rand::RngCore;
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

/// Length of a compact IPv4 peer entry (4 address bytes + 2 port bytes)
pub const COMPACT_V4_LEN: usize = 6;

/// Length of a compact IPv6 peer entry (16 address bytes + 2 port bytes)
pub const COMPACT_V6_LEN: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Compact peer list length {len} is not a multiple of {entry}")]
pub struct CompactPeersError {
    pub len: usize,
    pub entry: usize,
}

/// 20-byte peer identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Generate a client peer id: `-bT<version>-` followed by random bytes
    pub fn generate() -> Self {
        let prefix = format!("-bT{}-", env!("CARGO_PKG_VERSION"));
        let prefix = &prefix.as_bytes()[..prefix.len().min(20)];

        let mut id = [0u8; 20];
        id[..prefix.len()].copy_from_slice(prefix);
        rand::thread_rng().fill_bytes(&mut id[prefix.len()..]);
        Self(id)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 20]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

/// A remote peer, identified by its address
#[derive(Debug, Clone, Serialize)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: Option<PeerId>,
}

impl Peer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            peer_id: None,
        }
    }

    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({})", self.addr)
    }
}

/// Parse a compact IPv4 peer list (BEP 23)
pub fn parse_compact_v4(buf: &[u8]) -> Result<Vec<Peer>, CompactPeersError> {
    if buf.len() % COMPACT_V4_LEN != 0 {
        return Err(CompactPeersError {
            len: buf.len(),
            entry: COMPACT_V4_LEN,
        });
    }
    Ok(buf
        .chunks_exact(COMPACT_V4_LEN)
        .map(|c| {
            let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            let port = u16::from_be_bytes([c[4], c[5]]);
            Peer::new(SocketAddr::new(IpAddr::V4(ip), port))
        })
        .collect())
}

/// Parse a compact IPv6 peer list (BEP 7)
pub fn parse_compact_v6(buf: &[u8]) -> Result<Vec<Peer>, CompactPeersError> {
    if buf.len() % COMPACT_V6_LEN != 0 {
        return Err(CompactPeersError {
            len: buf.len(),
            entry: COMPACT_V6_LEN,
        });
    }
    Ok(buf
        .chunks_exact(COMPACT_V6_LEN)
        .map(|c| {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&c[..16]);
            let port = u16::from_be_bytes([c[16], c[17]]);
            Peer::new(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        })
        .collect())
}
