//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{AnnounceCommand, DownloadCommand, InfoCommand, ProxyCommand, ScrapeCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Minimal BitTorrent client
#[derive(Debug, Parser, Clone)]
#[command(name = "btorrent")]
#[command(version)]
#[command(about = "Inspect torrents, talk to trackers and connect to peers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding config.yaml
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Show the contents of a .torrent file
    Info(InfoCommand),

    /// Announce a torrent to its trackers and list the peers returned
    Announce(AnnounceCommand),

    /// Fetch swarm statistics for a torrent
    Scrape(ScrapeCommand),

    /// Join the swarm of a torrent until interrupted
    Download(DownloadCommand),

    /// Show, set or clear the HTTP proxy used for trackers
    Proxy(ProxyCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::EventArg;

    #[test]
    fn test_parse_announce() {
        let cli = Cli::try_parse_from([
            "btorrent",
            "-v",
            "announce",
            "file.torrent",
            "--event",
            "stopped",
            "--num-want",
            "20",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Announce(cmd) => {
                assert_eq!(cmd.file, PathBuf::from("file.torrent"));
                assert_eq!(cmd.event, EventArg::Stopped);
                assert_eq!(cmd.num_want, Some(20));
                assert!(!cmd.json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_proxy() {
        let cli = Cli::try_parse_from(["btorrent", "proxy", "abc.com", "123"]).unwrap();
        match cli.command {
            Command::Proxy(cmd) => {
                assert_eq!(cmd.host.as_deref(), Some("abc.com"));
                assert_eq!(cmd.port, Some(123));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["btorrent", "proxy", "--clear", "abc.com"]).is_err());
        assert!(Cli::try_parse_from(["btorrent", "proxy", "abc.com", "http"]).is_err());
    }

    #[test]
    fn test_global_config_dir() {
        let cli =
            Cli::try_parse_from(["btorrent", "scrape", "a.torrent", "--config-dir", "/tmp/bt"])
                .unwrap();
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/bt")));
    }

    #[test]
    fn test_download_defaults() {
        let cli = Cli::try_parse_from(["btorrent", "download", "a.torrent"]).unwrap();
        match cli.command {
            Command::Download(cmd) => {
                assert!(!cmd.no_listen);
                assert_eq!(cmd.port, None);
                assert_eq!(cmd.duration, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
