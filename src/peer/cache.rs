use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Peers recently returned by the tracker, with when they were last seen.
///
/// Bookkeeping only: nothing reads this to pick or order download sources.
#[derive(Debug, Default)]
pub struct ActivePeerCache(RwLock<HashMap<String, Instant>>);

impl ActivePeerCache {
    pub fn touch_all(&self, peers: &[String], now: Instant) {
        let mut entries = self.0.write();
        for peer in peers {
            entries.insert(peer.clone(), now);
        }
    }

    /// Drops entries last seen more than `horizon` before `now`.
    pub fn sweep(&self, now: Instant, horizon: Duration) -> Vec<String> {
        let mut entries = self.0.write();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > horizon)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &expired {
            entries.remove(peer);
        }
        expired
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.0.read().contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Peers ordered by address, with how long ago each was seen.
    pub fn snapshot(&self, now: Instant) -> Vec<(String, Duration)> {
        let mut peers: Vec<_> = self
            .0
            .read()
            .iter()
            .map(|(peer, seen)| (peer.clone(), now.saturating_duration_since(*seen)))
            .collect();
        peers.sort();
        peers
    }
}
