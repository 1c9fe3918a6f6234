//! Peer wire protocol: handshake, messages, framing and per-peer state

pub mod codec;
pub mod connection;
pub mod message;
pub mod session;

pub use codec::{HandshakeCodec, MessageCodec};
pub use connection::PeerConnection;
pub use message::{Handshake, Message};
pub use session::PeerSession;

use crate::peer::BitfieldError;
use std::time::Duration;
use thiserror::Error;

/// Error types for peer connections
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Unknown message id {0}")]
    UnknownMessage(u8),

    #[error("Invalid length {len} for {kind} message")]
    BadLength { kind: &'static str, len: usize },

    #[error("Unrecognized message or unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("Handshake failed: {0}")]
    Handshake(&'static str),

    #[error("Invalid bitfield: {0}")]
    Bitfield(#[from] BitfieldError),

    #[error("Invalid request for piece {index}, {length} bytes")]
    InvalidRequest { index: u32, length: u32 },

    #[error("Peer queued more than {0} requests")]
    TooManyRequests(usize),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
