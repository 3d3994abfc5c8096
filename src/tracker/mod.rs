use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::conn::{ConnError, Connection};
use crate::messages::{Command, Message, Status};
use crate::periodic::spawn_periodic;

pub mod error;
pub mod registry;

pub use error::TrackerError;
pub use registry::Registry;

/// The central index: accepts one request per connection and answers it from
/// the [`Registry`]. Never touches file bytes.
pub struct Tracker {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: Arc<TrackerConfig>,
}

impl Tracker {
    /// Binds on all interfaces at the configured port.
    pub async fn bind(config: TrackerConfig) -> Result<Self, TrackerError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
        Self::bind_to(addr, config).await
    }

    pub async fn bind_to(addr: SocketAddr, config: TrackerConfig) -> Result<Self, TrackerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|error| TrackerError::Bind { addr, error })?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TrackerError> {
        self.listener.local_addr().map_err(TrackerError::LocalAddr)
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Serves connections and runs the reaper until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let reaper = spawn_reaper(self.registry.clone(), &self.config, shutdown.clone());
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "tracker running");
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, remote) = match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "accept failed");
                    continue;
                }
            };

            let registry = self.registry.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(error) = handle_connection(&registry, &config, stream).await {
                    debug!(%remote, %error, "connection dropped");
                }
            });
        }

        let _ = reaper.await;
        info!("tracker stopped");
    }
}

/// Evicts stale peers every `reap_interval`.
pub fn spawn_reaper(
    registry: Arc<Registry>,
    config: &TrackerConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let stale_after = config.stale_after();
    spawn_periodic("reaper", config.reap_interval(), shutdown, move || {
        let registry = registry.clone();
        async move {
            for address in registry.reap(Instant::now(), stale_after) {
                info!(%address, "removed inactive peer");
            }
        }
    })
}

async fn handle_connection(
    registry: &Registry,
    config: &TrackerConfig,
    stream: TcpStream,
) -> Result<(), ConnError> {
    let mut conn = Connection::new(stream);
    let request = conn.read_message(config.read_timeout()).await?;

    let write_timeout = if request.command == Some(Command::List) {
        config.list_write_timeout()
    } else {
        config.write_timeout()
    };
    let Some(response) = dispatch(registry, request, conn.remote()) else {
        return Ok(());
    };
    conn.write_message(response, write_timeout).await
}

/// Applies one request to the registry. `None` means the request is not one
/// the tracker serves and the connection is closed without a response.
pub(crate) fn dispatch(registry: &Registry, request: Message, remote: &str) -> Option<Message> {
    match request.command {
        Some(Command::Register) => {
            let Some(address) = request.address else {
                warn!(%remote, "register without an address");
                return Some(Message::response(Status::MissingAddress));
            };
            registry.register(&address, &request.files);
            info!(%address, files = request.files.len(), "peer registered");
            Some(Message::ok())
        }
        Some(Command::Heartbeat) => {
            let address = request.address.unwrap_or_default();
            if registry.heartbeat(&address) {
                debug!(%address, "heartbeat");
                Some(Message::ok())
            } else {
                warn!(%address, "heartbeat from unregistered peer");
                Some(Message::response(Status::PeerNotRegistered))
            }
        }
        Some(Command::List) => Some(Message::ok().with_filemap(registry.list())),
        Some(Command::GetPeers) => {
            let filename = request.filename.unwrap_or_default();
            Some(Message::ok().with_peers(registry.peers_for(&filename)))
        }
        Some(Command::Download) | None => {
            warn!(%remote, command = ?request.command, "unknown command");
            None
        }
    }
}
