use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::PeerConfig;
use crate::conn::Connection;
use crate::messages::Message;
use crate::peer::files::resolve_in_dir;
use crate::peer::{Peer, PeerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub filename: String,
    pub path: PathBuf,
    /// the peer the file was finally fetched from
    pub source: String,
    pub bytes: u64,
}

impl Peer {
    /// Fetches `filename` into `dest_dir`, trying the tracker's peers in the
    /// order it returned them until one succeeds.
    pub async fn download(
        &self,
        filename: &str,
        dest_dir: &Path,
    ) -> Result<DownloadReport, PeerError> {
        let dest = resolve_in_dir(dest_dir, filename)
            .ok_or_else(|| PeerError::InvalidFilename(filename.to_owned()))?;

        let peers = self.tracker.get_peers(filename).await?;
        if peers.is_empty() {
            return Err(PeerError::NoPeers {
                filename: filename.to_owned(),
            });
        }
        self.active_peers.touch_all(&peers, Instant::now());

        let mut last_error = None;
        for peer in &peers {
            match fetch_from_peer(peer, filename, dest_dir, &dest, &self.config).await {
                Ok(bytes) => {
                    self.known_files.insert(filename);
                    info!(filename, bytes, from = %peer, "downloaded");
                    return Ok(DownloadReport {
                        filename: filename.to_owned(),
                        path: dest,
                        source: peer.clone(),
                        bytes,
                    });
                }
                Err(error) => {
                    warn!(filename, from = %peer, %error, "download attempt failed");
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(last) => Err(PeerError::AllPeersFailed {
                filename: filename.to_owned(),
                attempts: peers.len(),
                last: Box::new(last),
            }),
            None => Err(PeerError::NoPeers {
                filename: filename.to_owned(),
            }),
        }
    }
}

/// Prefix of in-flight downloads in the destination directory. The directory
/// scan skips these so half-written files are never advertised.
pub const PARTIAL_PREFIX: &str = ".peershare-";

/// One independent attempt against one peer.
///
/// Bytes go to a temporary file next to `dest` that replaces it only once the
/// whole file arrived, so a failed attempt leaves an existing `dest` untouched.
async fn fetch_from_peer(
    peer: &str,
    filename: &str,
    dest_dir: &Path,
    dest: &Path,
    config: &PeerConfig,
) -> Result<u64, PeerError> {
    let timeout = config.transfer_timeout();
    let mut conn = Connection::connect(peer, config.connect_timeout()).await?;
    let response = conn
        .request(Message::download(filename), timeout, timeout)
        .await?;
    let status = response.status();
    if !status.is_ok() {
        return Err(PeerError::Status {
            op: "download",
            status,
        });
    }

    // an empty file comes without a size
    let size = response.size.unwrap_or(0);
    let local_err = |error| PeerError::LocalFile {
        path: dest_dir.to_path_buf(),
        error,
    };
    // dropping `partial` deletes it
    let partial = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .suffix(".part")
        .tempfile_in(dest_dir)
        .map_err(local_err)?;
    let mut file = File::from_std(partial.reopen().map_err(local_err)?);
    conn.receive_file(&mut file, size, timeout).await?;
    drop(file);

    partial.persist(dest).map_err(|error| PeerError::LocalFile {
        path: dest.to_path_buf(),
        error: error.error,
    })?;
    Ok(size)
}
