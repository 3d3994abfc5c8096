use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::messages::Status;
use crate::periodic::spawn_periodic;

pub mod cache;
pub mod download;
pub mod error;
pub mod files;
pub mod local_ip;
pub mod server;
pub mod tracker_client;

pub use cache::ActivePeerCache;
pub use download::DownloadReport;
pub use error::PeerError;
pub use files::KnownFiles;
pub use server::{FileServer, ServerStats};
pub use tracker_client::TrackerClient;

/// Where this peer stands with the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Unregistered,
    /// `advertised` is the file list the last successful register sent
    Registered { advertised: BTreeSet<String> },
}

/// What one registration/heartbeat cycle ended up sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Heartbeat,
    /// a full register, because we weren't registered or our files changed
    Registered,
    /// the tracker rejected the heartbeat and the peer registered again
    Reregistered,
}

/// A participant in the swarm: keeps itself registered with the tracker and
/// downloads from other peers. Serving files is done by [`FileServer`].
pub struct Peer {
    address: String,
    config: PeerConfig,
    tracker: TrackerClient,
    known_files: KnownFiles,
    active_peers: ActivePeerCache,
    registration: Mutex<Registration>,
}

impl Peer {
    /// `address` is the `host:port` other peers reach this peer's file server on.
    pub fn new(address: impl Into<String>, config: PeerConfig) -> Self {
        Self {
            address: address.into(),
            tracker: TrackerClient::new(&config),
            config,
            known_files: KnownFiles::default(),
            active_peers: ActivePeerCache::default(),
            registration: Mutex::new(Registration::Unregistered),
        }
    }

    /// The configured advertise address, or the outbound local IP with `port`.
    pub async fn resolve_address(config: &PeerConfig, port: u16) -> io::Result<String> {
        if let Some(address) = &config.advertise_addr {
            return Ok(address.clone());
        }
        let ip = local_ip::resolve_local_ip().await?;
        Ok(format!("{ip}:{port}"))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn known_files(&self) -> &KnownFiles {
        &self.known_files
    }

    pub fn active_peers(&self) -> &ActivePeerCache {
        &self.active_peers
    }

    pub fn registration(&self) -> Registration {
        self.registration.lock().clone()
    }

    /// Scans the shared directory and registers the result with the tracker.
    pub async fn register(&self) -> Result<(), PeerError> {
        let files = self.rescan().await?;
        self.register_files(files).await
    }

    async fn rescan(&self) -> Result<Vec<String>, PeerError> {
        let files = files::scan_shared_dir(&self.config.shared_dir).await?;
        self.known_files.rebuild(&files);
        Ok(files)
    }

    async fn register_files(&self, files: Vec<String>) -> Result<(), PeerError> {
        let advertised: BTreeSet<String> = files.iter().cloned().collect();
        self.tracker.register(&self.address, files).await?;
        debug!(files = advertised.len(), "registered with tracker");
        *self.registration.lock() = Registration::Registered { advertised };
        Ok(())
    }

    /// One periodic cycle: rescan, then heartbeat if the tracker already knows
    /// our current files, register otherwise.
    pub async fn heartbeat_cycle(&self) -> Result<CycleOutcome, PeerError> {
        let files = self.rescan().await?;
        let current = self.known_files.snapshot();
        let needs_register = match &*self.registration.lock() {
            Registration::Unregistered => true,
            Registration::Registered { advertised } => *advertised != current,
        };
        if needs_register {
            self.register_files(files).await?;
            return Ok(CycleOutcome::Registered);
        }

        match self.tracker.heartbeat(&self.address).await {
            Ok(()) => Ok(CycleOutcome::Heartbeat),
            Err(PeerError::Status {
                status: Status::PeerNotRegistered,
                ..
            }) => {
                warn!(address = %self.address, "tracker no longer knows this peer, registering again");
                *self.registration.lock() = Registration::Unregistered;
                self.register_files(files).await?;
                Ok(CycleOutcome::Reregistered)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn list(&self) -> Result<BTreeMap<String, Vec<String>>, PeerError> {
        self.tracker.list().await
    }

    /// Evicts cache entries older than the configured horizon.
    pub fn sweep_cache(&self) -> Vec<String> {
        let expired = self
            .active_peers
            .sweep(Instant::now(), self.config.cache_horizon());
        for peer in &expired {
            debug!(%peer, "removed inactive peer from cache");
        }
        expired
    }

    /// Registers once, then keeps the heartbeat cycle and the cache sweep
    /// running until `shutdown` is cancelled. A failed registration is logged
    /// and retried by the next cycle.
    pub async fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        match self.register().await {
            Ok(()) => info!(address = %self.address, tracker = self.tracker.addr(), "registered with tracker"),
            Err(error) => warn!(%error, "initial registration failed"),
        }

        let peer = self.clone();
        let heartbeat = spawn_periodic(
            "heartbeat",
            self.config.heartbeat_interval(),
            shutdown.clone(),
            move || {
                let peer = peer.clone();
                async move {
                    match peer.heartbeat_cycle().await {
                        Ok(outcome) => debug!(?outcome, "heartbeat cycle"),
                        Err(error) => warn!(%error, "heartbeat cycle failed"),
                    }
                }
            },
        );

        let peer = self.clone();
        let sweep = spawn_periodic(
            "peer cache sweep",
            self.config.cache_sweep_interval(),
            shutdown,
            move || {
                let peer = peer.clone();
                async move {
                    peer.sweep_cache();
                }
            },
        );

        vec![heartbeat, sweep]
    }
}
