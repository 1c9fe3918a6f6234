//! Shared fixtures for integration tests: torrent files and fake trackers
#![allow(dead_code)]

use btorrent::bencode::{encode, Value};
use bytes::{Buf, BufMut, BytesMut};
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

pub const CONTENT: &[u8] = b"hello, world!\n";
pub const PIECE_LEN: usize = 4;

/// Concatenated SHA-1 digests of each piece of `content`
pub fn piece_hashes(content: &[u8], piece_len: usize) -> Vec<u8> {
    content
        .chunks(piece_len)
        .flat_map(|chunk| Sha1::digest(chunk).to_vec())
        .collect()
}

/// Single-file torrent for [`CONTENT`] with the given trackers
pub fn torrent_bytes(announce: &str, announce_list: &[&[&str]]) -> Vec<u8> {
    let info = Value::dict()
        .with("length", CONTENT.len() as i64)
        .with("name", "abc.txt")
        .with("piece length", PIECE_LEN as i64)
        .with("pieces", piece_hashes(CONTENT, PIECE_LEN));
    let mut root = Value::dict()
        .with("announce", announce)
        .with("comment", "test torrent")
        .with("created by", "btorrent tests")
        .with("creation date", 1_600_000_000i64)
        .with("info", info);
    if !announce_list.is_empty() {
        let tiers: Vec<Value> = announce_list
            .iter()
            .map(|tier| Value::List(tier.iter().map(|url| Value::from(*url)).collect()))
            .collect();
        root = root.with("announce-list", tiers);
    }
    encode(&root)
}

pub fn write_torrent(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Compact IPv4 peer entry
pub fn compact_peer(addr: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = addr else {
        panic!("IPv4 address expected");
    };
    let mut entry = v4.ip().octets().to_vec();
    entry.extend_from_slice(&v4.port().to_be_bytes());
    entry
}

/// HTTP tracker answering every request with the same bencoded body
pub struct FakeHttpTracker {
    pub announce_url: String,
    /// Request targets (path and query) in arrival order
    pub requests: mpsc::UnboundedReceiver<String>,
}

pub async fn http_tracker(body: Vec<u8>) -> FakeHttpTracker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, requests) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let head = String::from_utf8_lossy(&request);
            let target = head.split_whitespace().nth(1).unwrap_or_default().to_string();
            let _ = tx.send(target);

            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        }
    });

    FakeHttpTracker {
        announce_url: format!("http://{}/announce", addr),
        requests,
    }
}

/// Bencoded announce reply listing `peers` in compact form
pub fn announce_body(interval: i64, peers: &[SocketAddr]) -> Vec<u8> {
    let compact: Vec<u8> = peers.iter().flat_map(|p| compact_peer(*p)).collect();
    encode(
        &Value::dict()
            .with("interval", interval)
            .with("complete", 5i64)
            .with("incomplete", 7i64)
            .with("peers", compact),
    )
}

pub const UDP_CONNECTION_ID: u64 = 0x1122_3344_5566_7788;

/// UDP tracker (BEP 15) that drops the first `drop_first` datagrams
pub struct FakeUdpTracker {
    pub url: String,
    /// Actions of the datagrams it answered
    pub actions: mpsc::UnboundedReceiver<u32>,
}

pub async fn udp_tracker(peers: Vec<SocketAddr>, drop_first: usize) -> FakeUdpTracker {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let (tx, actions) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let mut dropped = 0;
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            if dropped < drop_first {
                dropped += 1;
                continue;
            }
            let mut req = &buf[..len];
            if req.len() < 16 {
                continue;
            }
            let connection_id = req.get_u64();
            let action = req.get_u32();
            let transaction_id = req.get_u32();

            let mut reply = BytesMut::new();
            match action {
                0 => {
                    reply.put_u32(0);
                    reply.put_u32(transaction_id);
                    reply.put_u64(UDP_CONNECTION_ID);
                }
                1 | 2 if connection_id != UDP_CONNECTION_ID => {
                    reply.put_u32(3);
                    reply.put_u32(transaction_id);
                    reply.put_slice(b"bad connection id\0");
                }
                1 => {
                    reply.put_u32(1);
                    reply.put_u32(transaction_id);
                    reply.put_u32(1800);
                    reply.put_u32(2);
                    reply.put_u32(3);
                    for peer in &peers {
                        reply.put_slice(&compact_peer(*peer));
                    }
                }
                2 => {
                    reply.put_u32(2);
                    reply.put_u32(transaction_id);
                    for i in 0..(req.len() / 20) as u32 {
                        reply.put_u32(10 + i);
                        reply.put_u32(20 + i);
                        reply.put_u32(30 + i);
                    }
                }
                _ => continue,
            }
            let _ = tx.send(action);
            let _ = socket.send_to(&reply, from).await;
        }
    });

    FakeUdpTracker {
        url: format!("udp://{}", addr),
        actions,
    }
}
