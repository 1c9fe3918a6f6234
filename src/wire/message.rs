//! Peer wire messages (BEP 3)
//!
//! ```text
//! handshake:  <pstrlen=19><pstr="BitTorrent protocol"><reserved:8><info_hash:20><peer_id:20>
//! message:    <length:4><id:1><payload>
//! keep-alive: <length=0>
//! ```

use super::{Result, WireError};
use crate::metainfo::InfoHash;
use crate::peer::PeerId;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Protocol string for BitTorrent v1.0
pub const PROTOCOL_NAME: &[u8] = b"BitTorrent protocol";

/// Total handshake length for v1.0
pub const HANDSHAKE_LEN: usize = 1 + PROTOCOL_NAME.len() + 8 + 20 + 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: u64,
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            reserved: 0,
            info_hash,
            peer_id,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HANDSHAKE_LEN);
        dst.put_u8(PROTOCOL_NAME.len() as u8);
        dst.put_slice(PROTOCOL_NAME);
        dst.put_u64(self.reserved);
        dst.put_slice(self.info_hash.as_bytes());
        dst.put_slice(self.peer_id.as_bytes());
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse a complete handshake; `buf` must hold at least [`HANDSHAKE_LEN`] bytes
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let name_len = usize::from(*buf.first().ok_or(WireError::Closed)?);
        if name_len != PROTOCOL_NAME.len() || buf.get(1..1 + name_len) != Some(PROTOCOL_NAME) {
            return Err(unsupported(buf));
        }
        let mut rest = buf
            .get(1 + name_len..HANDSHAKE_LEN)
            .ok_or(WireError::BadLength {
                kind: "handshake",
                len: buf.len(),
            })?;
        let reserved = rest.get_u64();
        let mut info_hash = [0u8; 20];
        rest.copy_to_slice(&mut info_hash);
        let mut peer_id = [0u8; 20];
        rest.copy_to_slice(&mut peer_id);
        Ok(Self {
            reserved,
            info_hash: InfoHash(info_hash),
            peer_id: PeerId(peer_id),
        })
    }
}

pub(super) fn unsupported(buf: &[u8]) -> WireError {
    let shown = &buf[..buf.len().min(16)];
    let ellipsis = if buf.len() > 16 { "..." } else { "" };
    WireError::UnsupportedProtocol(format!("{:?}{}", String::from_utf8_lossy(shown), ellipsis))
}

/// Length-prefixed peer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Port(u16),
}

impl Message {
    pub fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have { .. } => Some(4),
            Message::Bitfield(_) => Some(5),
            Message::Request { .. } => Some(6),
            Message::Piece { .. } => Some(7),
            Message::Cancel { .. } => Some(8),
            Message::Port(_) => Some(9),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep-alive",
            Message::Choke => "choke",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::NotInterested => "not interested",
            Message::Have { .. } => "have",
            Message::Bitfield(_) => "bitfield",
            Message::Request { .. } => "request",
            Message::Piece { .. } => "piece",
            Message::Cancel { .. } => "cancel",
            Message::Port(_) => "port",
        }
    }

    /// Value of the length prefix
    pub fn length_prefix(&self) -> usize {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield(bits) => 1 + bits.len(),
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len(),
            Message::Port(_) => 3,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.length_prefix();
        dst.reserve(4 + len);
        dst.put_u32(len as u32);
        if let Some(id) = self.id() {
            dst.put_u8(id);
        }
        match self {
            Message::Have { piece_index } => dst.put_u32(*piece_index),
            Message::Bitfield(bits) => dst.put_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                dst.put_u32(*index);
                dst.put_u32(*begin);
                dst.put_u32(*length);
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                dst.put_u32(*index);
                dst.put_u32(*begin);
                dst.put_slice(block);
            }
            Message::Port(port) => dst.put_u16(*port),
            _ => {}
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse a message body (everything after the length prefix)
    pub fn parse(mut body: Bytes) -> Result<Self> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }
        let id = body.get_u8();
        let len = body.len();
        let expect = |kind: &'static str, want: usize| {
            if len == want {
                Ok(())
            } else {
                Err(WireError::BadLength { kind, len: len + 1 })
            }
        };

        let message = match id {
            0 => expect("choke", 0).map(|_| Message::Choke)?,
            1 => expect("unchoke", 0).map(|_| Message::Unchoke)?,
            2 => expect("interested", 0).map(|_| Message::Interested)?,
            3 => expect("not interested", 0).map(|_| Message::NotInterested)?,
            4 => {
                expect("have", 4)?;
                Message::Have {
                    piece_index: body.get_u32(),
                }
            }
            5 => Message::Bitfield(body),
            6 | 8 => {
                expect(if id == 6 { "request" } else { "cancel" }, 12)?;
                let (index, begin, length) = (body.get_u32(), body.get_u32(), body.get_u32());
                if id == 6 {
                    Message::Request {
                        index,
                        begin,
                        length,
                    }
                } else {
                    Message::Cancel {
                        index,
                        begin,
                        length,
                    }
                }
            }
            7 => {
                if len < 8 {
                    return Err(WireError::BadLength {
                        kind: "piece",
                        len: len + 1,
                    });
                }
                let index = body.get_u32();
                let begin = body.get_u32();
                Message::Piece {
                    index,
                    begin,
                    block: body,
                }
            }
            9 => {
                expect("port", 2)?;
                Message::Port(body.get_u16())
            }
            other => return Err(WireError::UnknownMessage(other)),
        };
        Ok(message)
    }
}
