//! A metainfo document together with where it was loaded from

use super::{InfoHash, Result, TorrentMetadata};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct TorrentFile {
    pub metadata: TorrentMetadata,
    pub file_name: Option<PathBuf>,
}

impl TorrentFile {
    pub fn new(metadata: TorrentMetadata, file_name: Option<PathBuf>) -> Self {
        Self {
            metadata,
            file_name,
        }
    }

    /// Load and parse a `.torrent` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let buf = std::fs::read(path)?;
        debug!("Read {} bytes from {}", buf.len(), path.display());
        Ok(Self::new(
            TorrentMetadata::from_bytes(&buf)?,
            Some(path.to_path_buf()),
        ))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Ok(Self::new(TorrentMetadata::from_bytes(buf)?, None))
    }

    pub fn info_hash(&self) -> InfoHash {
        self.metadata.info.info_hash
    }

    pub fn total_size(&self) -> u64 {
        self.metadata.info.total_size
    }
}
