use std::future::Future;
use std::io;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::time::FutureExt;

use crate::messages::{FILE_CHUNK_SIZE, Message, MessageFramer};

pub mod error;

pub use error::ConnError;

/// One point-to-point exchange: request/response messages, optionally followed
/// by raw file bytes.
///
/// Every read and write is bounded by the timeout passed in. Any error,
/// timeouts included, leaves the connection unusable and callers drop it.
pub struct Connection {
    framed: Framed<TcpStream, MessageFramer>,
    remote: String,
}

impl Connection {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ConnError> {
        let tcp = TcpStream::connect(addr)
            .timeout(timeout)
            .await
            .map_err(|_| ConnError::Timeout {
                op: "connect",
                timeout,
            })?
            .map_err(|error| ConnError::Connect {
                addr: addr.to_owned(),
                error,
            })?;
        Ok(Self::new(tcp))
    }

    pub fn new(tcp: TcpStream) -> Self {
        let remote = tcp
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        Self {
            framed: Framed::new(tcp, MessageFramer::default()),
            remote,
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub async fn read_message(&mut self, timeout: Duration) -> Result<Message, ConnError> {
        match self.framed.next().timeout(timeout).await {
            Ok(Some(message)) => Ok(message?),
            Ok(None) => Err(ConnError::Closed),
            Err(_) => Err(ConnError::Timeout {
                op: "read a message",
                timeout,
            }),
        }
    }

    pub async fn write_message(
        &mut self,
        message: Message,
        timeout: Duration,
    ) -> Result<(), ConnError> {
        match self.framed.send(message).timeout(timeout).await {
            Ok(sent) => Ok(sent?),
            Err(_) => Err(ConnError::Timeout {
                op: "write a message",
                timeout,
            }),
        }
    }

    /// Writes one request and waits for its single response.
    pub async fn request(
        &mut self,
        message: Message,
        write_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Message, ConnError> {
        self.write_message(message, write_timeout).await?;
        self.read_message(read_timeout).await
    }

    /// Streams exactly `size` bytes from `reader` onto the socket.
    pub async fn send_file<R>(
        &mut self,
        reader: &mut R,
        size: u64,
        timeout: Duration,
    ) -> Result<(), ConnError>
    where
        R: AsyncRead + Unpin,
    {
        let tcp = self.framed.get_mut();
        let mut buf = vec![0_u8; FILE_CHUNK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = bounded("read the local file", timeout, reader.read(&mut buf[..want])).await?;
            if n == 0 {
                return Err(ConnError::ShortTransfer {
                    expected: size,
                    transferred: size - remaining,
                });
            }
            bounded("write file bytes", timeout, tcp.write_all(&buf[..n])).await?;
            remaining -= n as u64;
        }
        bounded("flush file bytes", timeout, tcp.flush()).await
    }

    /// Copies exactly `size` bytes following the last message into `writer`.
    ///
    /// Bytes the framer already buffered past the response line are written
    /// first.
    pub async fn receive_file<W>(
        &mut self,
        writer: &mut W,
        size: u64,
        timeout: Duration,
    ) -> Result<(), ConnError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut remaining = size;

        let buffered = self.framed.read_buffer_mut();
        if !buffered.is_empty() && remaining > 0 {
            let n = (buffered.len() as u64).min(remaining) as usize;
            let head = buffered.split_to(n);
            bounded("write the local file", timeout, writer.write_all(&head)).await?;
            remaining -= n as u64;
        }

        let tcp = self.framed.get_mut();
        let mut buf = vec![0_u8; FILE_CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = bounded("read file bytes", timeout, tcp.read(&mut buf[..want])).await?;
            if n == 0 {
                return Err(ConnError::ShortTransfer {
                    expected: size,
                    transferred: size - remaining,
                });
            }
            bounded("write the local file", timeout, writer.write_all(&buf[..n])).await?;
            remaining -= n as u64;
        }
        bounded("flush the local file", timeout, writer.flush()).await
    }
}

async fn bounded<T>(
    op: &'static str,
    timeout: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, ConnError> {
    fut.timeout(timeout)
        .await
        .map_err(|_| ConnError::Timeout { op, timeout })?
        .map_err(|error| ConnError::Io { op, error })
}
