use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FramerError {
    #[error("Failed to read or write a message with the error: `{0}`")]
    Io(#[from] io::Error),
    #[error("Failed to de- or encode a message as JSON with the error: `{0}`")]
    Json(#[from] serde_json::Error),
    #[error("Frame of length {0} is too large.")]
    FrameTooLarge(usize),
}
