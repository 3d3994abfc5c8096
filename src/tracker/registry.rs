use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// The tracker's view of the swarm: who is alive and who has what.
///
/// Lock order is always `peers` then `files`. Both are taken together only by
/// `register` and `reap`, so readers of `files` never observe an address that
/// has no liveness record.
#[derive(Debug, Default)]
pub struct Registry {
    /// address -> last seen
    peers: RwLock<HashMap<String, Instant>>,
    /// filename -> addresses advertising it, never empty
    files: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `address` as alive and advertising exactly `files`. Files it
    /// advertised before and no longer lists are dropped.
    pub fn register(&self, address: &str, files: &[String]) {
        self.register_at(address, files, Instant::now());
    }

    pub(crate) fn register_at(&self, address: &str, files: &[String], now: Instant) {
        let mut peers = self.peers.write();
        let mut index = self.files.write();

        if peers.insert(address.to_owned(), now).is_some() {
            index.retain(|file, holders| {
                if !files.contains(file) {
                    holders.remove(address);
                }
                !holders.is_empty()
            });
        }
        for file in files {
            index
                .entry(file.clone())
                .or_default()
                .insert(address.to_owned());
        }
    }

    /// Refreshes a known peer. Returns false if the address has no record; a
    /// heartbeat never creates one.
    pub fn heartbeat(&self, address: &str) -> bool {
        self.heartbeat_at(address, Instant::now())
    }

    pub(crate) fn heartbeat_at(&self, address: &str, now: Instant) -> bool {
        match self.peers.write().get_mut(address) {
            Some(last_seen) => {
                *last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.peers.read().contains_key(address)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Snapshot of every advertised file and its peers.
    pub fn list(&self) -> BTreeMap<String, Vec<String>> {
        self.files
            .read()
            .iter()
            .map(|(file, peers)| (file.clone(), peers.iter().cloned().collect()))
            .collect()
    }

    /// Peers advertising `filename`; empty if nobody does.
    pub fn peers_for(&self, filename: &str) -> Vec<String> {
        self.files
            .read()
            .get(filename)
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Evicts every peer last seen more than `stale_after` before `now`, from
    /// the liveness map and from every file, in one critical section.
    pub fn reap(&self, now: Instant, stale_after: Duration) -> Vec<String> {
        let mut peers = self.peers.write();
        let stale: Vec<String> = peers
            .iter()
            .filter(|(_, last_seen)| now.saturating_duration_since(**last_seen) > stale_after)
            .map(|(address, _)| address.clone())
            .collect();
        if stale.is_empty() {
            return stale;
        }

        let mut index = self.files.write();
        for address in &stale {
            peers.remove(address);
        }
        index.retain(|_, holders| {
            for address in &stale {
                holders.remove(address);
            }
            !holders.is_empty()
        });

        stale
    }
}
