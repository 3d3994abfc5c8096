use std::{io, net::SocketAddr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to bind the tracker to `{addr}` with the error: `{error}`")]
    Bind { addr: SocketAddr, error: io::Error },
    #[error("Failed to read the local address of the listener with the error: `{0}`")]
    LocalAddr(io::Error),
}
