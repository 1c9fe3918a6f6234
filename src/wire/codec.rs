//! `tokio_util` codecs framing handshakes and messages on a byte stream

use super::message::{unsupported, Handshake, Message, HANDSHAKE_LEN, PROTOCOL_NAME};
use super::WireError;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest accepted frame: a 16 KiB block plus headers, or a bitfield for ~16M pieces
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Frames the fixed-size handshake exchanged before any message
#[derive(Debug, Default, Clone, Copy)]
pub struct HandshakeCodec;

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Handshake>, WireError> {
        let Some(&name_len) = src.first() else {
            return Ok(None);
        };
        if usize::from(name_len) != PROTOCOL_NAME.len() {
            return Err(unsupported(src));
        }
        // Reject a foreign protocol as soon as its name is visible
        let seen = src.len().min(1 + PROTOCOL_NAME.len());
        if src[1..seen] != PROTOCOL_NAME[..seen - 1] {
            return Err(unsupported(src));
        }
        if src.len() < HANDSHAKE_LEN {
            src.reserve(HANDSHAKE_LEN - src.len());
            return Ok(None);
        }
        let frame = src.split_to(HANDSHAKE_LEN);
        Handshake::parse(&frame).map(Some)
    }
}

impl Encoder<Handshake> for HandshakeCodec {
    type Error = WireError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), WireError> {
        item.encode(dst);
        Ok(())
    }
}

/// Frames length-prefixed peer messages
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_frame_len: usize,
}

impl MessageCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_len {
            return Err(WireError::FrameTooLarge(len));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let body = src.split_to(len).freeze();
        Message::parse(body).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::InfoHash;
    use crate::peer::PeerId;
    use bytes::BufMut;

    #[test]
    fn test_message_codec_waits_for_full_frame() {
        let mut codec = MessageCodec::default();
        let bytes = Message::Have { piece_index: 7 }.to_bytes();
        let mut buf = BytesMut::new();

        buf.put_slice(&bytes[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(&bytes[3..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(&bytes[6..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::Have { piece_index: 7 })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_message_codec_several_frames() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        for msg in [Message::KeepAlive, Message::Unchoke, Message::Port(6881)] {
            codec.encode(msg, &mut buf).unwrap();
        }
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::KeepAlive));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Unchoke));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Port(6881)));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_message_codec_rejects_large_frame() {
        let mut codec = MessageCodec::new(16);
        let mut buf = BytesMut::from(&[0u8, 0, 0, 17, 7][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::FrameTooLarge(17))
        ));
    }

    #[test]
    fn test_handshake_codec() {
        let hs = Handshake::new(InfoHash([1; 20]), PeerId([2; 20]));
        let mut codec = HandshakeCodec;
        let mut buf = BytesMut::new();
        codec.encode(hs, &mut buf).unwrap();
        buf.put_slice(&Message::Interested.to_bytes());

        let mut partial = buf.split_to(30);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(hs));
        // Leftover bytes belong to the message stream
        assert_eq!(
            MessageCodec::default().decode(&mut partial).unwrap(),
            Some(Message::Interested)
        );
    }

    #[test]
    fn test_handshake_codec_rejects_early() {
        let mut codec = HandshakeCodec;
        let mut buf = BytesMut::from(&b"\x13BitTorrent prOtocol"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::UnsupportedProtocol(_))
        ));
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::UnsupportedProtocol(_))
        ));
    }
}
