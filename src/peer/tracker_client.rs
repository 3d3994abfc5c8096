use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::PeerConfig;
use crate::conn::Connection;
use crate::messages::Message;
use crate::peer::PeerError;

/// Talks to the tracker, one short-lived connection per call.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    addr: String,
    connect_timeout: Duration,
    timeout: Duration,
    list_timeout: Duration,
}

impl TrackerClient {
    pub fn new(config: &PeerConfig) -> Self {
        Self {
            addr: config.tracker_addr.clone(),
            connect_timeout: config.connect_timeout(),
            timeout: config.tracker_timeout(),
            list_timeout: config.list_timeout(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(
        &self,
        op: &'static str,
        request: Message,
        read_timeout: Duration,
    ) -> Result<Message, PeerError> {
        let mut conn = Connection::connect(&self.addr, self.connect_timeout).await?;
        let response = conn.request(request, self.timeout, read_timeout).await?;
        let status = response.status();
        if !status.is_ok() {
            return Err(PeerError::Status { op, status });
        }
        Ok(response)
    }

    pub async fn register(&self, address: &str, files: Vec<String>) -> Result<(), PeerError> {
        self.call("registration", Message::register(address, files), self.timeout)
            .await
            .map(|_| ())
    }

    /// Fails with a `peer not registered` status if the tracker has no record
    /// of `address`.
    pub async fn heartbeat(&self, address: &str) -> Result<(), PeerError> {
        self.call("heartbeat", Message::heartbeat(address), self.timeout)
            .await
            .map(|_| ())
    }

    pub async fn list(&self) -> Result<BTreeMap<String, Vec<String>>, PeerError> {
        let response = self.call("list", Message::list(), self.list_timeout).await?;
        Ok(response.filemap)
    }

    pub async fn get_peers(&self, filename: &str) -> Result<Vec<String>, PeerError> {
        let response = self
            .call("getpeers", Message::get_peers(filename), self.timeout)
            .await?;
        Ok(response.peers)
    }
}
