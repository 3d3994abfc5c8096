use std::{io, time::Duration};

use thiserror::Error;

use crate::messages::FramerError;

#[derive(Error, Debug)]
pub enum ConnError {
    #[error("Failed to establish a tcp connection to the address `{addr}` with error: `{error}`")]
    Connect { addr: String, error: io::Error },
    #[error("Timed out after {timeout:?} while trying to {op}.")]
    Timeout { op: &'static str, timeout: Duration },
    #[error("Failed to exchange a message with the error: `{0}`")]
    Framing(#[from] FramerError),
    #[error("The remote side closed the connection before sending a message.")]
    Closed,
    #[error("Failed to {op} with the error: `{error}`")]
    Io { op: &'static str, error: io::Error },
    #[error("The transfer ended after {transferred} of {expected} bytes.")]
    ShortTransfer { expected: u64, transferred: u64 },
}
