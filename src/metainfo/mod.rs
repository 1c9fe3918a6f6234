//! Torrent metainfo (`.torrent` file) parsing

pub mod torrent_file;

pub use torrent_file::TorrentFile;

use crate::bencode::{self, BencodeError, Value};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Size of one SHA-1 piece hash
pub const HASH_LEN: usize = 20;

/// Error types for metainfo parsing
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("Invalid bencode: {0}")]
    Bencode(#[from] BencodeError),

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Failed to read torrent file: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MetainfoError>;

/// SHA-1 of the bencoded info dictionary
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Hash raw bencoded bytes
    pub fn of(raw: &[u8]) -> Self {
        Self(Sha1::digest(raw).into())
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 20]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Top-level metainfo dictionary
#[derive(Debug, Clone, Serialize)]
pub struct TorrentMetadata {
    pub announce: Option<String>,
    pub announce_list: Vec<Vec<String>>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub encoding: String,
    pub publisher: Option<String>,
    pub publisher_url: Option<String>,
    pub info: MetadataInfo,
}

/// The `info` dictionary
#[derive(Debug, Clone, Serialize)]
pub struct MetadataInfo {
    pub piece_length: u64,
    pub private: bool,
    /// Root directory in multi-file mode; empty in single file mode
    pub name: PathBuf,
    pub files: Vec<MetadataFile>,
    pub total_size: u64,
    #[serde(skip)]
    pub hashes: Vec<[u8; HASH_LEN]>,
    pub info_hash: InfoHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataFile {
    pub path: PathBuf,
    pub length: u64,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub md5sum: Option<Vec<u8>>,
}

fn serialize_opt_hex<S: Serializer>(
    value: &Option<Vec<u8>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_some(&hex::encode(v)),
        None => serializer.serialize_none(),
    }
}

impl TorrentMetadata {
    /// Parse a complete `.torrent` buffer.
    ///
    /// The info hash is taken over the info dictionary bytes exactly as they
    /// appear in `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let value = bencode::decode(buf)?;
        let raw_info = bencode::raw_dict_value(buf, b"info")?
            .ok_or(MetainfoError::MissingField("info"))?;
        Self::parse(&value, InfoHash::of(raw_info))
    }

    /// Build from an already decoded value, hashing the canonical encoding of `info`
    pub fn from_value(value: &Value) -> Result<Self> {
        let info = value.get("info").ok_or(MetainfoError::MissingField("info"))?;
        Self::parse(value, InfoHash::of(&bencode::encode(info)))
    }

    fn parse(value: &Value, info_hash: InfoHash) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(invalid("metainfo", "not a dictionary"));
        }

        let encoding = opt_string(value, "encoding")?.unwrap_or_else(|| "utf8".to_string());
        let announce = opt_string(value, "announce")?;
        let announce_list = match value.get("announce-list") {
            Some(v) => parse_announce_list(v)?,
            None => Vec::new(),
        };
        if announce.is_none() && announce_list.iter().all(Vec::is_empty) {
            return Err(MetainfoError::MissingField("announce"));
        }

        let creation_date = match value.get("creation date") {
            Some(v) => {
                let secs = v
                    .as_int()
                    .ok_or_else(|| invalid("creation date", "not an integer"))?;
                Utc.timestamp_opt(secs, 0).single()
            }
            None => None,
        };

        let info = value.get("info").ok_or(MetainfoError::MissingField("info"))?;

        Ok(Self {
            announce,
            announce_list,
            comment: opt_string(value, "comment")?,
            created_by: opt_string(value, "created by")?,
            creation_date,
            encoding,
            publisher: opt_string(value, "publisher")?,
            publisher_url: opt_string(value, "publisher-url")?,
            info: MetadataInfo::from_value(info, info_hash)?,
        })
    }
}

impl MetadataInfo {
    /// Parse an info dictionary
    pub fn from_value(info: &Value, info_hash: InfoHash) -> Result<Self> {
        if info.as_dict().is_none() {
            return Err(invalid("info", "not a dictionary"));
        }

        let pieces = info
            .get("pieces")
            .ok_or(MetainfoError::MissingField("pieces"))?
            .as_bytes()
            .ok_or_else(|| invalid("pieces", "not a byte string"))?;
        if pieces.len() % HASH_LEN != 0 {
            return Err(invalid(
                "pieces",
                format!("length {} is not a multiple of {}", pieces.len(), HASH_LEN),
            ));
        }
        let hashes = pieces
            .chunks_exact(HASH_LEN)
            .map(|c| {
                let mut h = [0u8; HASH_LEN];
                h.copy_from_slice(c);
                h
            })
            .collect();

        let piece_length = required_u64(info, "piece length")?;
        if piece_length == 0 {
            return Err(invalid("piece length", "must be positive"));
        }
        let private = match info.get("private") {
            Some(v) => v.as_int().ok_or_else(|| invalid("private", "not an integer"))? != 0,
            None => false,
        };

        let raw_name = opt_string(info, "name")?.ok_or(MetainfoError::MissingField("name"))?;
        let name = checked_path(std::iter::once(raw_name.as_str()), "name")?;

        let mut files = Vec::new();
        let mut total_size = 0u64;
        let root = if let Some(length) = info.get("length") {
            let length = to_u64(length, "length")?;
            files.push(MetadataFile {
                path: name,
                length,
                md5sum: opt_bytes(info, "md5sum")?,
            });
            total_size = length;
            PathBuf::new()
        } else {
            let list = info
                .get("files")
                .ok_or(MetainfoError::MissingField("files"))?
                .as_list()
                .ok_or_else(|| invalid("files", "not a list"))?;
            for entry in list {
                let parts = entry
                    .get("path")
                    .and_then(Value::as_list)
                    .ok_or(MetainfoError::MissingField("path"))?
                    .iter()
                    .map(|p| p.as_str().ok_or_else(|| invalid("path", "not a UTF-8 string")))
                    .collect::<Result<Vec<_>>>()?;
                let length = required_u64(entry, "length")?;
                total_size = total_size
                    .checked_add(length)
                    .ok_or_else(|| invalid("length", "total size overflows"))?;
                files.push(MetadataFile {
                    path: checked_path(parts.into_iter(), "path")?,
                    length,
                    md5sum: opt_bytes(entry, "md5sum")?,
                });
            }
            name
        };

        Ok(Self {
            piece_length,
            private,
            name: root,
            files,
            total_size,
            hashes,
            info_hash,
        })
    }

    pub fn pieces_amount(&self) -> usize {
        self.hashes.len()
    }

    /// Size of the piece at `index`; the last piece may be shorter
    pub fn piece_size(&self, index: usize) -> Option<u64> {
        if index >= self.hashes.len() {
            return None;
        }
        let start = self.piece_length.saturating_mul(index as u64);
        Some(self.piece_length.min(self.total_size.saturating_sub(start)))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> MetainfoError {
    MetainfoError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn opt_string(value: &Value, key: &'static str) -> Result<Option<String>> {
    match value.get(key) {
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| invalid(key, "not a UTF-8 string")),
        None => Ok(None),
    }
}

fn opt_bytes(value: &Value, key: &'static str) -> Result<Option<Vec<u8>>> {
    match value.get(key) {
        Some(v) => v
            .as_bytes()
            .map(|b| Some(b.to_vec()))
            .ok_or_else(|| invalid(key, "not a byte string")),
        None => Ok(None),
    }
}

fn to_u64(value: &Value, key: &'static str) -> Result<u64> {
    value
        .as_int()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| invalid(key, "not a non-negative integer"))
}

fn required_u64(value: &Value, key: &'static str) -> Result<u64> {
    to_u64(value.get(key).ok_or(MetainfoError::MissingField(key))?, key)
}

fn parse_announce_list(value: &Value) -> Result<Vec<Vec<String>>> {
    let tiers = value
        .as_list()
        .ok_or_else(|| invalid("announce-list", "not a list"))?;
    tiers
        .iter()
        .map(|tier| {
            tier.as_list()
                .ok_or_else(|| invalid("announce-list", "tier is not a list"))?
                .iter()
                .map(|url| {
                    url.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("announce-list", "url is not a UTF-8 string"))
                })
                .collect()
        })
        .collect()
}

/// Join path components, refusing anything that would escape the download directory
fn checked_path<'a>(parts: impl Iterator<Item = &'a str>, field: &'static str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for part in parts {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => path.push(part),
            _ => return Err(invalid(field, format!("unsafe path component {:?}", part))),
        }
    }
    if path.as_os_str().is_empty() {
        return Err(invalid(field, "empty path"));
    }
    Ok(path)
}
