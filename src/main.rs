use anyhow::{Context, Result};
use btorrent::cli::commands::{
    AnnounceCommand, DownloadCommand, InfoCommand, ProxyCommand, ScrapeCommand,
};
use btorrent::cli::output::*;
use btorrent::cli::{Cli, Command};
use btorrent::client::{default_config_dir, Client};
use btorrent::metainfo::TorrentFile;
use std::path::Path;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Logs go to stderr so JSON output stays parseable
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);

    match &cli.command {
        Command::Info(cmd) => show_info(cmd)?,
        Command::Announce(cmd) => announce(cmd, &config_dir).await?,
        Command::Scrape(cmd) => scrape(cmd, &config_dir).await?,
        Command::Download(cmd) => download(cmd, &config_dir).await?,
        Command::Proxy(cmd) => proxy(cmd, &config_dir)?,
    }

    Ok(())
}

fn show_info(cmd: &InfoCommand) -> Result<()> {
    let file = TorrentFile::from_file(&cmd.file)
        .with_context(|| format!("Failed to load {}", cmd.file.display()))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&file.metadata)?);
        return Ok(());
    }

    println!("{} Torrent {}", INFO, style(cmd.file.display()).bold());
    println!("{}", format_metadata(&file.metadata, cmd.files));
    Ok(())
}

fn load_client(config_dir: &Path, torrent: &Path) -> Result<(Client, btorrent::InfoHash)> {
    let mut client = Client::load(config_dir).context("Failed to load client config")?;
    let info_hash = client
        .add_torrent_file(torrent)
        .with_context(|| format!("Failed to load {}", torrent.display()))?;
    Ok((client, info_hash))
}

async fn announce(cmd: &AnnounceCommand, config_dir: &Path) -> Result<()> {
    let (mut client, info_hash) = load_client(config_dir, &cmd.file)?;
    let mut params = client.announce_params(cmd.event.into());
    if let Some(num_want) = cmd.num_want {
        params = params.num_want(num_want);
    }
    let torrent = client
        .torrent_mut(info_hash)
        .context("Torrent was not added")?;

    let spinner = create_spinner(format!("Announcing {}", torrent.name()));
    let answered = torrent.announce(&params).await;
    spinner.finish_and_clear();

    if !answered {
        println!("{} No tracker answered for {}", CROSS, style(torrent.name()).bold());
        std::process::exit(1);
    }

    if cmd.json {
        let data = serde_json::json!({
            "info_hash": info_hash,
            "interval": torrent.interval,
            "seeders": torrent.seeders,
            "leechers": torrent.leechers,
            "peers": torrent.peers(),
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!(
        "{} {} announced: {} seeders, {} leechers, next announce in {}",
        CHECK,
        style(torrent.name()).bold(),
        style(torrent.seeders).green(),
        style(torrent.leechers).yellow(),
        format_duration(Duration::from_secs(u64::from(torrent.interval)))
    );
    if torrent.peers().is_empty() {
        println!("{} No peers returned", WARN);
    } else {
        println!("  Peers ({}):", torrent.peers().len());
        println!("{}", format_peers(torrent.peers()));
    }
    Ok(())
}

async fn scrape(cmd: &ScrapeCommand, config_dir: &Path) -> Result<()> {
    let (mut client, info_hash) = load_client(config_dir, &cmd.file)?;
    let torrent = client
        .torrent_mut(info_hash)
        .context("Torrent was not added")?;

    let spinner = create_spinner(format!("Scraping {}", torrent.name()));
    let result = torrent.scrape().await;
    spinner.finish_and_clear();

    let Some(file) = result else {
        println!("{} No tracker answered the scrape for {}", CROSS, style(torrent.name()).bold());
        std::process::exit(1);
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&file)?);
    } else {
        println!("{} {}: {}", CHECK, style(torrent.name()).bold(), format_scrape(&file));
    }
    Ok(())
}

async fn download(cmd: &DownloadCommand, config_dir: &Path) -> Result<()> {
    let (mut client, info_hash) = load_client(config_dir, &cmd.file)?;
    let mut config = client.manager_config().listen(!cmd.no_listen);
    if let Some(port) = cmd.port {
        config.port = port;
    }

    let manager = client.start(info_hash, config)?;
    println!("{} Started {}", ROCKET, style(info_hash).cyan());

    let mut status = manager.status();
    let spinner = create_spinner("Announcing");
    let deadline = async {
        match cmd.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                spinner.set_message(format_status(&status.borrow_and_update()));
            }
        }
    }

    spinner.set_message("Stopping");
    let torrent = manager.stop().await.context("Torrent manager failed")?;
    spinner.finish_and_clear();
    println!(
        "{} Stopped {}: {} known peers",
        CHECK,
        style(torrent.name()).bold(),
        torrent.peers().len()
    );
    Ok(())
}

fn proxy(cmd: &ProxyCommand, config_dir: &Path) -> Result<()> {
    let mut client = Client::load(config_dir).context("Failed to load client config")?;

    if cmd.clear {
        client.set_proxy(None, None)?;
        println!("{} Proxy cleared", CHECK);
    } else if let Some(host) = &cmd.host {
        client.set_proxy(Some(host), cmd.port)?;
        println!(
            "{} Trackers will use proxy {}",
            CHECK,
            style(client.proxy().unwrap_or_default()).cyan()
        );
    } else {
        match client.proxy() {
            Some(proxy) => println!("{} Proxy: {}", INFO, style(proxy).cyan()),
            None => println!("{} No proxy configured", INFO),
        }
    }
    Ok(())
}
