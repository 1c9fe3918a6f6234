//! Background task driving one torrent: announces and peer connections

use crate::metainfo::InfoHash;
use crate::peer::{Peer, PeerId};
use crate::torrent::{AnnounceParams, Torrent};
use crate::tracker::AnnounceEvent;
use crate::wire::connection::CONNECT_TIMEOUT;
use crate::wire::session::KEEP_ALIVE_TIMEOUT;
use crate::wire::{Message, PeerConnection, PeerSession, WireError};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest wait between two announces, whatever the tracker says
pub const MIN_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for the `stopped` announce on shutdown
pub const STOP_ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub peer_id: PeerId,
    /// Port announced to trackers, and listened on when `listen` is set
    pub port: u16,
    pub num_want: i32,
    pub connect_timeout: Duration,
    pub listen: bool,
}

impl ManagerConfig {
    pub fn new(peer_id: PeerId, port: u16, num_want: i32) -> Self {
        Self {
            peer_id,
            port,
            num_want,
            connect_timeout: CONNECT_TIMEOUT,
            listen: false,
        }
    }

    pub fn listen(mut self, listen: bool) -> Self {
        self.listen = listen;
        self
    }
}

/// Snapshot of a running torrent, published after every change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    pub announced: bool,
    pub seeders: u32,
    pub leechers: u32,
    pub known_peers: usize,
    pub connected: usize,
    pub listening: Option<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PeerEvent {
    Connected { addr: SocketAddr, peer_id: PeerId },
    Have { addr: SocketAddr, piece_index: u32 },
    Disconnected { addr: SocketAddr, reason: String },
}

/// State shared by all peer tasks of one torrent
#[derive(Debug)]
struct PeerContext {
    info_hash: InfoHash,
    peer_id: PeerId,
    bitfield: Bytes,
    pieces: usize,
    timeout: Duration,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerContext {
    fn notify(&self, event: PeerEvent) {
        // The manager only goes away after every peer task has finished
        let _ = self.events.send(event);
    }

    fn finished(&self, addr: SocketAddr, result: Result<(), WireError>) {
        let reason = match result {
            Ok(()) => "stopped".to_string(),
            Err(e) => e.to_string(),
        };
        debug!("Peer {} finished: {}", addr, reason);
        self.notify(PeerEvent::Disconnected { addr, reason });
    }
}

/// Handle to a torrent running in the background
#[derive(Debug)]
pub struct TorrentManager {
    info_hash: InfoHash,
    cancel: CancellationToken,
    handle: JoinHandle<Torrent>,
    status: watch::Receiver<ManagerStatus>,
}

impl TorrentManager {
    /// Spawn the manager task on the current tokio runtime
    pub fn spawn(torrent: Torrent, config: ManagerConfig) -> Self {
        let info_hash = torrent.info_hash();
        let cancel = CancellationToken::new();
        let (status_tx, status) = watch::channel(ManagerStatus::default());
        let handle = tokio::spawn(run(torrent, config, cancel.clone(), status_tx));
        Self {
            info_hash,
            cancel,
            handle,
            status,
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn status(&self) -> watch::Receiver<ManagerStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Disconnect all peers, announce `stopped` and hand the torrent back
    pub async fn stop(self) -> Result<Torrent, JoinError> {
        info!("Stopping torrent {}", self.info_hash);
        self.cancel.cancel();
        self.handle.await
    }
}

async fn accept(listener: &Option<TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut torrent: Torrent,
    config: ManagerConfig,
    cancel: CancellationToken,
    status: watch::Sender<ManagerStatus>,
) -> Torrent {
    let info_hash = torrent.info_hash();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let ctx = Arc::new(PeerContext {
        info_hash,
        peer_id: config.peer_id,
        bitfield: Bytes::copy_from_slice(torrent.bitfield().as_bytes()),
        pieces: torrent.bitfield().len(),
        timeout: config.connect_timeout,
        events: events_tx,
    });

    let listener = if config.listen {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port)).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("Cannot listen on port {}: {}", config.port, e);
                None
            }
        }
    } else {
        None
    };
    let listening = listener.as_ref().and_then(|l| l.local_addr().ok());

    let mut tasks = JoinSet::new();
    // Addresses with a running peer task, and those past the handshake
    let mut running: HashSet<SocketAddr> = HashSet::new();
    let mut connected: HashSet<SocketAddr> = HashSet::new();
    let mut event = AnnounceEvent::Started;
    let mut next_announce = Instant::now();

    info!("Starting torrent {} ({})", torrent.name(), info_hash);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep_until(next_announce) => {
                let params = AnnounceParams::new(event, config.peer_id, config.port)
                    .num_want(config.num_want);
                let attempt = Instant::now();
                let answered = tokio::select! {
                    _ = cancel.cancelled() => None,
                    answered = torrent.announce(&params) => Some(answered),
                };
                let Some(answered) = answered else { break };
                if answered {
                    event = AnnounceEvent::None;
                }
                next_announce = torrent
                    .next_announce()
                    .unwrap_or(attempt)
                    .max(attempt + MIN_ANNOUNCE_INTERVAL);

                for peer in torrent.peers() {
                    if running.insert(peer.addr) {
                        tasks.spawn(outbound(peer.clone(), ctx.clone(), cancel.child_token()));
                    }
                }
            }
            Some(peer_event) = events.recv() => match peer_event {
                PeerEvent::Connected { addr, peer_id } => {
                    info!("Connected to peer {}", addr);
                    connected.insert(addr);
                    torrent.add_peer(Peer::new(addr).with_peer_id(peer_id));
                }
                PeerEvent::Have { addr, piece_index } => {
                    debug!("Peer {} has piece {}", addr, piece_index);
                }
                PeerEvent::Disconnected { addr, reason } => {
                    if connected.remove(&addr) {
                        info!("Peer {} disconnected: {}", addr, reason);
                    }
                    running.remove(&addr);
                }
            },
            Some(joined) = tasks.join_next() => {
                if let Err(e) = joined {
                    warn!("Peer task failed: {}", e);
                }
            }
            accepted = accept(&listener) => match accepted {
                Ok((stream, addr)) => {
                    if running.insert(addr) {
                        tasks.spawn(inbound(stream, addr, ctx.clone(), cancel.child_token()));
                    } else {
                        debug!("Dropping duplicate connection from {}", addr);
                    }
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
        }

        status.send_replace(ManagerStatus {
            announced: torrent.last_announce().is_some(),
            seeders: torrent.seeders,
            leechers: torrent.leechers,
            known_peers: torrent.peers().len(),
            connected: connected.len(),
            listening,
        });
    }

    // Child tokens are cancelled with the parent, so every peer task ends
    cancel.cancel();
    while tasks.join_next().await.is_some() {}
    drop(listener);
    status.send_modify(|s| s.connected = 0);

    if torrent.last_announce().is_some() {
        let params = AnnounceParams::new(AnnounceEvent::Stopped, config.peer_id, config.port);
        if tokio::time::timeout(STOP_ANNOUNCE_TIMEOUT, torrent.announce(&params))
            .await
            .is_err()
        {
            warn!("Stopped announce for {} timed out", info_hash);
        }
    }
    info!("Torrent {} stopped", info_hash);
    torrent
}

async fn outbound(peer: Peer, ctx: Arc<PeerContext>, cancel: CancellationToken) {
    let addr = peer.addr;
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = async {
            let conn = PeerConnection::connect(addr, ctx.timeout)
                .await?
                .handshake(ctx.info_hash, ctx.peer_id, peer.peer_id, ctx.timeout)
                .await?;
            serve(conn, peer, &ctx).await
        } => result,
    };
    ctx.finished(addr, result);
}

async fn inbound(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<PeerContext>,
    cancel: CancellationToken,
) {
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = async {
            let info_hash = ctx.info_hash;
            let conn = PeerConnection::from_stream(stream, addr)
                .accept(ctx.peer_id, |hash| *hash == info_hash, ctx.timeout)
                .await?;
            serve(conn, Peer::new(addr), &ctx).await
        } => result,
    };
    ctx.finished(addr, result);
}

/// Exchange messages with a handshaked peer until it goes away or times out
async fn serve(mut conn: PeerConnection, peer: Peer, ctx: &PeerContext) -> Result<(), WireError> {
    let addr = peer.addr;
    let mut session = PeerSession::new(peer, ctx.pieces, Instant::now());
    if let Some(remote) = conn.remote().copied() {
        session.on_handshake(&remote)?;
        ctx.notify(PeerEvent::Connected {
            addr,
            peer_id: remote.peer_id,
        });
    }

    let bitfield = Message::Bitfield(ctx.bitfield.clone());
    session.mark_sent(&bitfield, Instant::now());
    conn.send(bitfield).await?;

    loop {
        tokio::select! {
            message = conn.recv() => {
                let message = message?;
                if let Message::Have { piece_index } = message {
                    ctx.notify(PeerEvent::Have { addr, piece_index });
                }
                let now = Instant::now();
                for reply in session.apply(message, now)? {
                    session.mark_sent(&reply, now);
                    conn.send(reply).await?;
                }
            }
            _ = sleep_until(session.keep_alive_deadline()) => {
                session.mark_sent(&Message::KeepAlive, Instant::now());
                conn.send(Message::KeepAlive).await?;
            }
            _ = sleep_until(session.expiry()) => {
                return Err(WireError::Timeout(KEEP_ALIVE_TIMEOUT));
            }
        }
    }
}
