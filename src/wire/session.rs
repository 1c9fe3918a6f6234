//! Per-peer protocol state

use super::message::{Handshake, Message};
use super::{Result, WireError};
use crate::peer::{Bitfield, Peer};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Peers that stay silent longer than this are dropped
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(120);

/// Our keep-alive goes out this much before the peer would time us out
pub const KEEP_ALIVE_BIAS: Duration = Duration::from_secs(5);

/// Largest block a peer may request
pub const MAX_BLOCK_LEN: u32 = 16 * 1024;

/// Outstanding requests a peer may queue before it is dropped
pub const MAX_QUEUED_REQUESTS: usize = 256;

/// A block the peer asked us for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

#[derive(Debug)]
pub struct PeerSession {
    pub peer: Peer,
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
    pub handshaked: bool,
    bitfield: Bitfield,
    bitfield_received: bool,
    requests: Vec<BlockRequest>,
    dht_port: Option<u16>,
    last_received: Instant,
    last_sent: Instant,
}

impl PeerSession {
    pub fn new(peer: Peer, pieces: usize, now: Instant) -> Self {
        Self {
            peer,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            handshaked: false,
            bitfield: Bitfield::new(pieces),
            bitfield_received: false,
            requests: Vec::new(),
            dht_port: None,
            last_received: now,
            last_sent: now,
        }
    }

    /// Pieces the peer has announced
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    /// Outstanding block requests from the peer
    pub fn requests(&self) -> &[BlockRequest] {
        &self.requests
    }

    pub fn dht_port(&self) -> Option<u16> {
        self.dht_port
    }

    /// Record the remote handshake, checking it against a known peer id
    pub fn on_handshake(&mut self, handshake: &Handshake) -> Result<()> {
        match self.peer.peer_id {
            Some(id) if id != handshake.peer_id => {
                return Err(WireError::Handshake("unexpected peer id"));
            }
            Some(_) => {}
            None => self.peer.peer_id = Some(handshake.peer_id),
        }
        self.handshaked = true;
        Ok(())
    }

    /// Apply a received message and return the replies to send
    pub fn apply(&mut self, message: Message, now: Instant) -> Result<Vec<Message>> {
        self.last_received = now;
        let mut replies = Vec::new();
        match message {
            Message::KeepAlive => {}
            Message::Choke => self.peer_choking = true,
            Message::Unchoke => self.peer_choking = false,
            Message::Interested => {
                self.peer_interested = true;
                if self.am_choking {
                    self.am_choking = false;
                    replies.push(Message::Unchoke);
                }
            }
            Message::NotInterested => self.peer_interested = false,
            Message::Have { piece_index } => {
                if !self.bitfield.set(piece_index as usize, true) {
                    debug!("{} announced unknown piece {}", self.peer, piece_index);
                }
            }
            Message::Bitfield(bytes) => {
                if self.bitfield_received {
                    warn!("Ignoring repeated bitfield from {}", self.peer);
                } else {
                    self.bitfield = Bitfield::from_bytes(&bytes, self.bitfield.len())?;
                    self.bitfield_received = true;
                }
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                let known_piece = (index as usize) < self.bitfield.len();
                if !known_piece || length == 0 || length > MAX_BLOCK_LEN {
                    return Err(WireError::InvalidRequest { index, length });
                }
                let request = BlockRequest {
                    index,
                    begin,
                    length,
                };
                if !self.requests.contains(&request) {
                    if self.requests.len() >= MAX_QUEUED_REQUESTS {
                        return Err(WireError::TooManyRequests(MAX_QUEUED_REQUESTS));
                    }
                    self.requests.push(request);
                }
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => self.requests.retain(|r| {
                *r != BlockRequest {
                    index,
                    begin,
                    length,
                }
            }),
            Message::Piece { index, begin, .. } => {
                debug!("Discarding block {}@{} from {}", index, begin, self.peer);
            }
            Message::Port(port) => self.dht_port = Some(port),
        }
        Ok(replies)
    }

    /// Note that we sent something, which resets our keep-alive clock
    pub fn mark_sent(&mut self, message: &Message, now: Instant) {
        self.last_sent = now;
        match message {
            Message::Choke => self.am_choking = true,
            Message::Unchoke => self.am_choking = false,
            Message::Interested => self.am_interested = true,
            Message::NotInterested => self.am_interested = false,
            _ => {}
        }
    }

    /// When our next keep-alive is due
    pub fn keep_alive_deadline(&self) -> Instant {
        self.last_sent + KEEP_ALIVE_TIMEOUT - KEEP_ALIVE_BIAS
    }

    pub fn keep_alive_due(&self, now: Instant) -> bool {
        now >= self.keep_alive_deadline()
    }

    /// When the peer is considered dead without further traffic
    pub fn expiry(&self) -> Instant {
        self.last_received + KEEP_ALIVE_TIMEOUT
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry()
    }
}
