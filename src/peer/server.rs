use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::fs::File;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::conn::{ConnError, Connection};
use crate::messages::{Command, Message, Status};
use crate::peer::PeerError;
use crate::peer::files::resolve_in_dir;

/// Completed transfers served by a [`FileServer`].
#[derive(Debug, Default)]
pub struct ServerStats {
    transfers: AtomicUsize,
    bytes_sent: AtomicU64,
}

impl ServerStats {
    pub fn transfers(&self) -> usize {
        self.transfers.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    fn record(&self, bytes: u64) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    read: Duration,
    write: Duration,
    transfer: Duration,
}

/// Serves files from the shared directory to other peers.
pub struct FileServer {
    listener: TcpListener,
    shared_dir: Arc<PathBuf>,
    timeouts: Timeouts,
    stats: Arc<ServerStats>,
}

impl FileServer {
    /// Binds on all interfaces at the configured port.
    pub async fn bind(config: &PeerConfig) -> Result<Self, PeerError> {
        Self::bind_to(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)), config).await
    }

    pub async fn bind_to(addr: SocketAddr, config: &PeerConfig) -> Result<Self, PeerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|error| PeerError::Bind { addr, error })?;
        Ok(Self {
            listener,
            shared_dir: Arc::new(config.shared_dir.clone()),
            timeouts: Timeouts {
                read: config.server_read_timeout(),
                write: config.server_write_timeout(),
                transfer: config.transfer_timeout(),
            },
            stats: Arc::new(ServerStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Accepts connections until `shutdown` is cancelled, one task each.
    pub async fn run(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, dir = %self.shared_dir.display(), "file server listening");
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

            let shared_dir = self.shared_dir.clone();
            let stats = self.stats.clone();
            let timeouts = self.timeouts;
            tokio::spawn(async move {
                if let Err(error) = handle_connection(&shared_dir, timeouts, &stats, stream).await {
                    debug!(%remote, %error, "connection dropped");
                }
            });
        }
    }
}

async fn handle_connection(
    shared_dir: &Path,
    timeouts: Timeouts,
    stats: &ServerStats,
    stream: TcpStream,
) -> Result<(), ConnError> {
    let mut conn = Connection::new(stream);
    let request = conn.read_message(timeouts.read).await?;
    match request.command {
        Some(Command::Download) => {
            let filename = request.filename.unwrap_or_default();
            serve_download(&mut conn, shared_dir, &filename, timeouts, stats).await
        }
        // anything else is dropped without an answer
        command => {
            warn!(remote = conn.remote(), ?command, "unknown command");
            Ok(())
        }
    }
}

async fn serve_download(
    conn: &mut Connection,
    shared_dir: &Path,
    filename: &str,
    timeouts: Timeouts,
    stats: &ServerStats,
) -> Result<(), ConnError> {
    let not_found = Message::response(Status::FileNotFound);
    let Some(path) = resolve_in_dir(shared_dir, filename) else {
        warn!(remote = conn.remote(), filename, "refused file name");
        return conn.write_message(not_found, timeouts.write).await;
    };
    let Ok(mut file) = File::open(&path).await else {
        return conn.write_message(not_found, timeouts.write).await;
    };
    let metadata = match file.metadata().await {
        Ok(metadata) => metadata,
        Err(error) => {
            warn!(path = %path.display(), %error, "stat failed");
            let response = Message::response(Status::ServerError);
            return conn.write_message(response, timeouts.write).await;
        }
    };
    if metadata.is_dir() {
        return conn.write_message(not_found, timeouts.write).await;
    }

    let size = metadata.len();
    conn.write_message(Message::ok().with_size(size), timeouts.write)
        .await?;
    conn.send_file(&mut file, size, timeouts.transfer).await?;

    stats.record(size);
    info!(filename, bytes = size, to = conn.remote(), "sent file");
    Ok(())
}
