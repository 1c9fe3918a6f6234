//! TCP connection to a single peer

use super::codec::{HandshakeCodec, MessageCodec};
use super::message::{Handshake, Message};
use super::{Result, WireError};
use crate::metainfo::InfoHash;
use crate::peer::PeerId;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Default time allowed to open a connection or complete a handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A peer connection; starts in handshake framing and switches to message
/// framing once both handshakes are exchanged
#[derive(Debug)]
pub struct PeerConnection<C = MessageCodec> {
    addr: SocketAddr,
    framed: Framed<TcpStream, C>,
    remote: Option<Handshake>,
}

async fn within<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| WireError::Timeout(limit))?
}

impl PeerConnection<HandshakeCodec> {
    /// Open an outgoing TCP connection
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = within(timeout, async { Ok(TcpStream::connect(addr).await?) }).await?;
        debug!("Connected to peer {}", addr);
        Ok(Self::from_stream(stream, addr))
    }

    /// Wrap an already established stream, e.g. an accepted incoming connection
    pub fn from_stream(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            addr,
            framed: Framed::new(stream, HandshakeCodec),
            remote: None,
        }
    }

    /// Send our handshake and validate the reply
    ///
    /// The reply must carry the same info hash, and the `expected` peer id when
    /// one is known from the tracker.
    pub async fn handshake(
        mut self,
        info_hash: InfoHash,
        our_id: PeerId,
        expected: Option<PeerId>,
        timeout: Duration,
    ) -> Result<PeerConnection> {
        let remote = within(timeout, async {
            self.framed.send(Handshake::new(info_hash, our_id)).await?;
            self.framed.next().await.ok_or(WireError::Closed)?
        })
        .await?;

        if remote.info_hash != info_hash {
            return Err(WireError::Handshake("peer answered for another torrent"));
        }
        if expected.is_some_and(|id| id != remote.peer_id) {
            return Err(WireError::Handshake("unexpected peer id"));
        }
        debug!("Handshake with {} complete", self.addr);
        Ok(self.into_messages(remote))
    }

    /// Wait for the remote handshake and answer it if `accept` knows the torrent
    pub async fn accept(
        mut self,
        our_id: PeerId,
        accept: impl Fn(&InfoHash) -> bool,
        timeout: Duration,
    ) -> Result<PeerConnection> {
        let remote = within(timeout, async {
            self.framed.next().await.ok_or(WireError::Closed)?
        })
        .await?;
        if !accept(&remote.info_hash) {
            return Err(WireError::Handshake("unknown info hash"));
        }
        within(
            timeout,
            self.framed.send(Handshake::new(remote.info_hash, our_id)),
        )
        .await?;
        debug!("Accepted handshake from {}", self.addr);
        Ok(self.into_messages(remote))
    }

    fn into_messages(self, remote: Handshake) -> PeerConnection {
        PeerConnection {
            addr: self.addr,
            framed: self.framed.map_codec(|_| MessageCodec::default()),
            remote: Some(remote),
        }
    }
}

impl<C> PeerConnection<C> {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The handshake received from the peer, once exchanged
    pub fn remote(&self) -> Option<&Handshake> {
        self.remote.as_ref()
    }
}

impl PeerConnection {
    pub async fn send(&mut self, message: Message) -> Result<()> {
        debug!("-> {} {}", self.addr, message.name());
        self.framed.send(message).await
    }

    /// Next message from the peer; [`WireError::Closed`] once the stream ends
    pub async fn recv(&mut self) -> Result<Message> {
        let message = self.framed.next().await.ok_or(WireError::Closed)??;
        debug!("<- {} {}", self.addr, message.name());
        Ok(message)
    }
}
