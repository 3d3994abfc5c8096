use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use peershare::config::{self, PeerConfig, TrackerConfig};
use peershare::prompt::run_prompt;
use peershare::{FileServer, Peer, Tracker};

#[derive(Parser, Debug)]
#[command(name = "peershare", about = "Tracker-based peer-to-peer file sharing")]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the tracker
    Tracker {
        port: u16,
        /// JSON file with tracker settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a peer with an interactive prompt
    Peer {
        /// host:port of the tracker
        tracker_addr: String,
        /// port of this peer's file server
        port: u16,
        /// directory whose files are shared and where downloads go
        shared_dir: PathBuf,
        /// address to announce instead of the detected local IP
        #[arg(long)]
        advertise: Option<String>,
        /// JSON file with peer settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Cmd::Tracker {
            port,
            config: config_file,
        } => run_tracker(port, config_file).await,
        Cmd::Peer {
            tracker_addr,
            port,
            shared_dir,
            advertise,
            config: config_file,
        } => {
            let mut peer_config = match config_file {
                Some(path) => config::load::<PeerConfig>(&path)?,
                None => PeerConfig::default(),
            };
            peer_config.tracker_addr = tracker_addr;
            peer_config.port = port;
            peer_config.shared_dir = shared_dir;
            if advertise.is_some() {
                peer_config.advertise_addr = advertise;
            }
            run_peer(peer_config).await
        }
    }
}

async fn run_tracker(port: u16, config_file: Option<PathBuf>) -> anyhow::Result<()> {
    let mut tracker_config = match config_file {
        Some(path) => config::load::<TrackerConfig>(&path)?,
        None => TrackerConfig::default(),
    };
    tracker_config.port = port;
    tracker_config.validate(PeerConfig::default().heartbeat_interval())?;

    let tracker = Tracker::bind(tracker_config)
        .await
        .context("starting the tracker")?;

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    tracker.run(shutdown).await;
    Ok(())
}

async fn run_peer(config: PeerConfig) -> anyhow::Result<()> {
    config.validate()?;
    tokio::fs::create_dir_all(&config.shared_dir)
        .await
        .with_context(|| format!("creating shared directory {}", config.shared_dir.display()))?;

    let server = FileServer::bind(&config)
        .await
        .context("starting the file server")?;
    let address = Peer::resolve_address(&config, config.port)
        .await
        .context("resolving the local address")?;
    info!(%address, "peer starting");

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    let peer = Arc::new(Peer::new(address, config));
    let background = peer.start(shutdown.clone()).await;

    let stdin = BufReader::new(tokio::io::stdin());
    let result = run_prompt(&peer, stdin, tokio::io::stdout()).await;

    shutdown.cancel();
    let _ = server_task.await;
    for task in background {
        let _ = task.await;
    }
    result.context("reading commands")
}
