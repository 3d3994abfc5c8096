use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

use crate::conn::ConnError;
use crate::messages::Status;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error(transparent)]
    Conn(#[from] ConnError),
    #[error("{op} failed: {status}")]
    Status { op: &'static str, status: Status },
    #[error("no peers available for `{filename}`")]
    NoPeers { filename: String },
    #[error("all {attempts} download attempts for `{filename}` failed. Last error: {last}")]
    AllPeersFailed {
        filename: String,
        attempts: usize,
        last: Box<PeerError>,
    },
    #[error("`{0}` is not a plain file name")]
    InvalidFilename(String),
    #[error("Failed to access the local file at `{path}` with the error: `{error}`")]
    LocalFile { path: PathBuf, error: io::Error },
    #[error("Failed to bind the file server to `{addr}` with the error: `{error}`")]
    Bind { addr: SocketAddr, error: io::Error },
    #[error("Failed to scan the shared directory `{path}` with the error: `{error}`")]
    Scan { path: PathBuf, error: io::Error },
}

impl PeerError {
    /// The status a remote side answered with, if that is what failed.
    pub fn status(&self) -> Option<&Status> {
        match self {
            PeerError::Status { status, .. } => Some(status),
            _ => None,
        }
    }
}
