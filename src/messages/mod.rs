use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

pub mod error;
pub mod status;

pub use error::FramerError;
pub use status::Status;

/// Size of the buffer file bytes are streamed through.
pub const FILE_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Register,
    Heartbeat,
    List,
    GetPeers,
    Download,
}

/// The single message type carried in both directions.
///
/// Requests set `command`; responses set `status`. Every other field is only
/// meaningful for some commands and is left out of the encoding when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    /// the sender's own `host:port`, used by register and heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filemap: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// byte length of the file that follows an ok download response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Message {
    fn request(command: Command) -> Self {
        Self {
            command: Some(command),
            ..Default::default()
        }
    }

    pub fn register(address: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            address: Some(address.into()),
            files,
            ..Self::request(Command::Register)
        }
    }

    pub fn heartbeat(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::request(Command::Heartbeat)
        }
    }

    pub fn list() -> Self {
        Self::request(Command::List)
    }

    pub fn get_peers(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::request(Command::GetPeers)
        }
    }

    pub fn download(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::request(Command::Download)
        }
    }

    pub fn response(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn ok() -> Self {
        Self::response(Status::Ok)
    }

    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_filemap(mut self, filemap: BTreeMap<String, Vec<String>>) -> Self {
        self.filemap = filemap;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// A response without a status field is treated like any other non-ok one.
    pub fn status(&self) -> Status {
        self.status
            .clone()
            .unwrap_or_else(|| Status::Other(String::new()))
    }
}

/// Frames messages as one JSON object per line.
///
/// The decoder only ever consumes up to and including the newline of the
/// message it returns, so raw bytes following a download response stay in
/// the read buffer.
#[derive(Debug, Default)]
pub struct MessageFramer {
    /// how far the current partial line has already been searched for `\n`
    next_index: usize,
}

const MAX: usize = 8 * 1024 * 1024;

impl Decoder for MessageFramer {
    type Item = Message;
    type Error = FramerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let start = self.next_index.min(src.len());
            let Some(offset) = src[start..].iter().position(|b| *b == b'\n') else {
                self.next_index = src.len();
                // Check that the pending line is not too large to avoid a denial of
                // service attack where the server runs out of memory.
                if src.len() > MAX {
                    return Err(FramerError::FrameTooLarge(src.len()));
                }
                return Ok(None);
            };
            let end = start + offset;
            self.next_index = 0;
            if end > MAX {
                return Err(FramerError::FrameTooLarge(end));
            }

            let line = src.split_to(end + 1);
            let line = &line[..end];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(serde_json::from_slice(line)?));
        }
    }
}

impl Encoder<Message> for MessageFramer {
    type Error = FramerError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = serde_json::to_vec(&item)?;
        // Don't send a line that is longer than the other end will accept.
        if encoded.len() > MAX {
            return Err(FramerError::FrameTooLarge(encoded.len()));
        }

        dst.reserve(encoded.len() + 1);
        dst.extend_from_slice(&encoded);
        dst.put_u8(b'\n');
        Ok(())
    }
}
