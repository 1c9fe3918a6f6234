//! UDP tracker transport (BEP 15)
//!
//! Every exchange is a single datagram each way. Requests carry a random
//! transaction id; replies with a different id or action are ignored.
//! Lost datagrams are retransmitted with a timeout of `base * 2^n`.

use super::{
    AnnounceRequest, AnnounceResponse, Result, ScrapeFile, ScrapeResponse, TrackerError,
    TrackerTransport, MAX_SCRAPE_TORRENTS,
};
use crate::metainfo::InfoHash;
use crate::peer;
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Magic constant identifying a connect request
pub const PROTOCOL_ID: u64 = 0x41727101980;

/// A connection id may be used for one minute after it was received
pub const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

const MAX_DATAGRAM: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect = 0,
    Announce = 1,
    Scrape = 2,
    Error = 3,
}

impl Action {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Action::Connect),
            1 => Some(Action::Announce),
            2 => Some(Action::Scrape),
            3 => Some(Action::Error),
            _ => None,
        }
    }
}

/// Retransmission settings
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Timeout of the first attempt
    pub base_timeout: Duration,
    /// Attempts after the first one; the timeout doubles each time
    pub max_retries: u32,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(15),
            max_retries: 8,
        }
    }
}

/// Decoded tracker datagram
#[derive(Debug, Clone)]
pub enum UdpResponse {
    Connect { connection_id: u64 },
    Announce(AnnounceResponse),
    /// `(seeders, completed, leechers)` per requested info hash, in request order
    Scrape(Vec<(u32, u32, u32)>),
    Error(String),
}

impl UdpResponse {
    fn action(&self) -> Action {
        match self {
            UdpResponse::Connect { .. } => Action::Connect,
            UdpResponse::Announce(_) => Action::Announce,
            UdpResponse::Scrape(_) => Action::Scrape,
            UdpResponse::Error(_) => Action::Error,
        }
    }
}

fn header(buf: &mut BytesMut, connection_id: u64, action: Action, transaction_id: u32) {
    buf.put_u64(connection_id);
    buf.put_u32(action as u32);
    buf.put_u32(transaction_id);
}

pub fn encode_connect(transaction_id: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16);
    header(&mut buf, PROTOCOL_ID, Action::Connect, transaction_id);
    buf
}

pub fn encode_announce(connection_id: u64, transaction_id: u32, request: &AnnounceRequest) -> BytesMut {
    let mut buf = BytesMut::with_capacity(98);
    header(&mut buf, connection_id, Action::Announce, transaction_id);
    buf.put_slice(request.info_hash.as_bytes());
    buf.put_slice(request.peer_id.as_bytes());
    buf.put_u64(request.downloaded);
    buf.put_u64(request.left);
    buf.put_u64(request.uploaded);
    buf.put_u32(request.event as u32);
    buf.put_u32(request.ip.map(u32::from).unwrap_or(0));
    buf.put_u32(request.key.unwrap_or(0));
    buf.put_i32(request.num_want);
    buf.put_u16(request.port);
    buf
}

pub fn encode_scrape(connection_id: u64, transaction_id: u32, info_hashes: &[InfoHash]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16 + 20 * info_hashes.len());
    header(&mut buf, connection_id, Action::Scrape, transaction_id);
    for hash in info_hashes {
        buf.put_slice(hash.as_bytes());
    }
    buf
}

/// Decode a tracker datagram.
///
/// Returns `None` for datagrams that do not answer `transaction_id` or
/// cannot be parsed; those are dropped by the caller.
pub fn decode_response(mut buf: &[u8], transaction_id: u32, ipv6: bool) -> Option<UdpResponse> {
    if buf.len() < 8 {
        return None;
    }
    let action = Action::from_u32(buf.get_u32())?;
    if buf.get_u32() != transaction_id {
        return None;
    }

    match action {
        Action::Connect => {
            if buf.len() < 8 {
                return None;
            }
            Some(UdpResponse::Connect {
                connection_id: buf.get_u64(),
            })
        }
        Action::Announce => {
            if buf.len() < 12 {
                return None;
            }
            let interval = buf.get_u32();
            let leechers = buf.get_u32();
            let seeders = buf.get_u32();
            let peers = if ipv6 {
                peer::parse_compact_v6(buf)
            } else {
                peer::parse_compact_v4(buf)
            }
            .ok()?;
            Some(UdpResponse::Announce(AnnounceResponse {
                interval,
                leechers,
                seeders,
                peers,
                ..Default::default()
            }))
        }
        Action::Scrape => {
            let mut stats = Vec::with_capacity(buf.len() / 12);
            while buf.len() >= 12 {
                stats.push((buf.get_u32(), buf.get_u32(), buf.get_u32()));
            }
            Some(UdpResponse::Scrape(stats))
        }
        Action::Error => {
            let message = String::from_utf8_lossy(buf);
            Some(UdpResponse::Error(message.trim_end_matches('\0').to_string()))
        }
    }
}

/// Send `packet` and wait for the matching reply, retransmitting on timeout
async fn exchange(
    socket: &UdpSocket,
    packet: &[u8],
    transaction_id: u32,
    expected: Action,
    config: &UdpConfig,
) -> Result<UdpResponse> {
    let peer_addr = socket.peer_addr()?;
    let ipv6 = peer_addr.is_ipv6();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    for attempt in 0..=config.max_retries {
        let wait = config.base_timeout * 2u32.saturating_pow(attempt);
        debug!("send {:?} to {} (attempt {}, timeout {:?})", expected, peer_addr, attempt, wait);
        socket.send(packet).await?;

        let deadline = Instant::now() + wait;
        loop {
            let len = match timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => break,
            };
            match decode_response(&buf[..len], transaction_id, ipv6) {
                Some(UdpResponse::Error(message)) => return Err(TrackerError::Failure(message)),
                Some(response) if response.action() == expected => return Ok(response),
                _ => debug!("Ignoring unexpected datagram from {}", peer_addr),
            }
        }
    }

    Err(TrackerError::Unreachable(peer_addr.to_string()))
}

/// Obtain a connection id from one resolved tracker address
async fn connect_addr(addr: SocketAddr, config: UdpConfig) -> Result<(UdpSocket, u64)> {
    let bind: SocketAddr = if addr.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;

    let transaction_id = rand::random::<u32>();
    let packet = encode_connect(transaction_id);
    match exchange(&socket, &packet, transaction_id, Action::Connect, &config).await? {
        UdpResponse::Connect { connection_id } => Ok((socket, connection_id)),
        _ => Err(TrackerError::Malformed("expected connect response".to_string())),
    }
}

#[derive(Debug)]
struct Session {
    socket: UdpSocket,
    connection_id: u64,
    obtained: Instant,
}

/// UDP tracker client
#[derive(Debug)]
pub struct UdpTransport {
    host: String,
    port: Option<u16>,
    config: UdpConfig,
    session: Mutex<Option<Session>>,
}

impl UdpTransport {
    pub fn new(url: &Url, config: UdpConfig) -> Result<Self> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TrackerError::Malformed(format!("no host in {}", url)))?;
        // IPv6 literals keep their brackets in the url
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = url.port();
        if port.is_none() {
            warn!("UDP tracker url {} has no port", url);
        }
        Ok(Self {
            host,
            port,
            config,
            session: Mutex::new(None),
        })
    }

    /// Resolve the tracker and race a connect exchange against every address
    async fn connect(&self) -> Result<Session> {
        let port = self
            .port
            .ok_or_else(|| TrackerError::Malformed(format!("no port for UDP tracker {}", self.host)))?;
        let target = format!("{}:{}", self.host, port);
        info!("Connecting to UDP tracker {}", target);

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), port))
            .await?
            .collect();

        let mut attempts = JoinSet::new();
        for addr in addrs {
            attempts.spawn(connect_addr(addr, self.config.clone()));
        }

        let mut failure = None;
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(Ok((socket, connection_id))) => {
                    attempts.abort_all();
                    debug!("Connected to {} (connection id {:#x})", target, connection_id);
                    return Ok(Session {
                        socket,
                        connection_id,
                        obtained: Instant::now(),
                    });
                }
                Ok(Err(TrackerError::Failure(message))) => {
                    failure = Some(TrackerError::Failure(message));
                }
                Ok(Err(e)) => debug!("Connect attempt to {} failed: {}", target, e),
                Err(e) => warn!("Connect task for {} panicked: {}", target, e),
            }
        }

        Err(failure.unwrap_or(TrackerError::Unreachable(target)))
    }

    /// Run one request on a live session, reconnecting when the connection id expired
    async fn request<F>(&self, build: F, expected: Action) -> Result<UdpResponse>
    where
        F: Fn(u64, u32) -> BytesMut,
    {
        let mut guard = self.session.lock().await;
        let session = match guard.take() {
            Some(s) if s.obtained.elapsed() < CONNECTION_ID_TTL => s,
            _ => self.connect().await?,
        };

        let transaction_id = rand::random::<u32>();
        let packet = build(session.connection_id, transaction_id);
        let result = exchange(&session.socket, &packet, transaction_id, expected, &self.config).await;

        // A dead tracker should be resolved again next time
        if !matches!(result, Err(TrackerError::Unreachable(_)) | Err(TrackerError::Io(_))) {
            *guard = Some(session);
        }
        result
    }
}

#[async_trait]
impl TrackerTransport for UdpTransport {
    async fn announce(&self, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        let response = self
            .request(
                |connection_id, transaction_id| encode_announce(connection_id, transaction_id, request),
                Action::Announce,
            )
            .await?;
        match response {
            UdpResponse::Announce(announce) => Ok(announce),
            _ => Err(TrackerError::Malformed("expected announce response".to_string())),
        }
    }

    async fn scrape(&self, info_hashes: &[InfoHash]) -> Result<ScrapeResponse> {
        if info_hashes.len() > MAX_SCRAPE_TORRENTS {
            return Err(TrackerError::TooManyHashes(info_hashes.len()));
        }
        let response = self
            .request(
                |connection_id, transaction_id| encode_scrape(connection_id, transaction_id, info_hashes),
                Action::Scrape,
            )
            .await?;
        match response {
            UdpResponse::Scrape(stats) => Ok(ScrapeResponse {
                files: scrape_files(stats, info_hashes)?,
            }),
            _ => Err(TrackerError::Malformed("expected scrape response".to_string())),
        }
    }
}

/// Pair scrape stats with the hashes they answer, in request order
fn scrape_files(stats: Vec<(u32, u32, u32)>, info_hashes: &[InfoHash]) -> Result<Vec<ScrapeFile>> {
    if stats.len() != info_hashes.len() {
        return Err(TrackerError::Malformed(format!(
            "scrape answered {} of {} torrents",
            stats.len(),
            info_hashes.len()
        )));
    }
    Ok(stats
        .into_iter()
        .zip(info_hashes)
        .map(|((seeders, completed, leechers), hash)| ScrapeFile {
            seeders,
            completed,
            leechers,
            name: None,
            info_hash: Some(*hash),
        })
        .collect())
}
