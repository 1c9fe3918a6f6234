//! CLI output formatting

use crate::manager::ManagerStatus;
use crate::metainfo::TorrentMetadata;
use crate::peer::Peer;
use crate::tracker::ScrapeFile;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner shown while waiting on the network
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Human readable size in binary units
pub fn format_bytes(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", size)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format torrent metadata for display
pub fn format_metadata(metadata: &TorrentMetadata, list_files: bool) -> String {
    let info = &metadata.info;
    let mut lines = Vec::new();

    let name = if info.name.as_os_str().is_empty() {
        info.files
            .first()
            .map(|f| f.path.display().to_string())
            .unwrap_or_default()
    } else {
        info.name.display().to_string()
    };
    lines.push(format!("  Name: {}", style(name).bold()));
    lines.push(format!("  Info hash: {}", style(info.info_hash).cyan()));
    lines.push(format!(
        "  Size: {} in {} file(s)",
        style(format_bytes(info.total_size)).cyan(),
        info.files.len()
    ));
    lines.push(format!(
        "  Pieces: {} x {}{}",
        info.pieces_amount(),
        format_bytes(info.piece_length),
        if info.private { " (private)" } else { "" }
    ));

    if let Some(date) = metadata.creation_date {
        lines.push(format!("  Created: {}", style(date.to_rfc3339()).dim()));
    }
    if let Some(created_by) = &metadata.created_by {
        lines.push(format!("  Created by: {}", created_by));
    }
    if let Some(comment) = &metadata.comment {
        lines.push(format!("  Comment: {}", comment));
    }

    if metadata.announce_list.is_empty() {
        if let Some(announce) = &metadata.announce {
            lines.push(format!("  Tracker: {}", announce));
        }
    } else {
        lines.push("  Trackers:".to_string());
        for (tier, urls) in metadata.announce_list.iter().enumerate() {
            lines.push(format!("    tier {}: {}", tier + 1, urls.join(", ")));
        }
    }

    if list_files {
        lines.push("  Files:".to_string());
        for file in &info.files {
            lines.push(format!(
                "    {} {}",
                file.path.display(),
                style(format!("({})", format_bytes(file.length))).dim()
            ));
        }
    }

    lines.join("\n")
}

/// Format a list of peers, one per line
pub fn format_peers<'a>(peers: impl IntoIterator<Item = &'a Peer>) -> String {
    let mut lines: Vec<String> = peers
        .into_iter()
        .map(|peer| match &peer.peer_id {
            Some(id) => format!("    {} {}", peer.addr, style(format!("{:?}", id)).dim()),
            None => format!("    {}", peer.addr),
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

pub fn format_scrape(file: &ScrapeFile) -> String {
    format!(
        "{} seeders, {} leechers, {} completed",
        style(file.seeders).green(),
        style(file.leechers).yellow(),
        style(file.completed).cyan()
    )
}

/// One-line summary of a running torrent
pub fn format_status(status: &ManagerStatus) -> String {
    let announce = if status.announced {
        style("announced").green().to_string()
    } else {
        style("announcing").yellow().to_string()
    };
    format!(
        "{} | {} seeders, {} leechers | {} known peers, {} connected",
        announce, status.seeders, status.leechers, status.known_peers, status.connected
    )
}
