//! CLI command definitions

use crate::tracker::AnnounceEvent;
use clap::Args;
use std::path::PathBuf;

/// Show the contents of a .torrent file
#[derive(Debug, Args, Clone)]
pub struct InfoCommand {
    /// Path to the .torrent file
    pub file: PathBuf,

    /// List every file of a multi-file torrent
    #[arg(long)]
    pub files: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Announce a torrent to its trackers
#[derive(Debug, Args, Clone)]
pub struct AnnounceCommand {
    /// Path to the .torrent file
    pub file: PathBuf,

    /// Event sent with the announce
    #[arg(long, value_enum, default_value_t = EventArg::Started)]
    pub event: EventArg,

    /// Number of peers to ask for (defaults to network.num_want)
    #[arg(long, allow_negative_numbers = true)]
    pub num_want: Option<i32>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Fetch swarm statistics for a torrent
#[derive(Debug, Args, Clone)]
pub struct ScrapeCommand {
    /// Path to the .torrent file
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Join the swarm of a torrent
#[derive(Debug, Args, Clone)]
pub struct DownloadCommand {
    /// Path to the .torrent file
    pub file: PathBuf,

    /// Port to listen on and announce (defaults to network.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not accept incoming peer connections
    #[arg(long)]
    pub no_listen: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,
}

/// Show, set or clear the tracker proxy
#[derive(Debug, Args, Clone)]
pub struct ProxyCommand {
    /// Proxy host, or host:port
    #[arg(conflicts_with = "clear")]
    pub host: Option<String>,

    /// Proxy port when not part of the host
    pub port: Option<u16>,

    /// Remove the configured proxy
    #[arg(long)]
    pub clear: bool,
}

/// Announce event argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventArg {
    None,
    Started,
    Completed,
    Stopped,
}

impl From<EventArg> for AnnounceEvent {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::None => AnnounceEvent::None,
            EventArg::Started => AnnounceEvent::Started,
            EventArg::Completed => AnnounceEvent::Completed,
            EventArg::Stopped => AnnounceEvent::Stopped,
        }
    }
}
