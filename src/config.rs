//! Tracker and peer configuration.
//!
//! Durations are stored as whole seconds so config files stay readable; use the
//! accessor methods to get a [`Duration`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read the config file at `{path}` with the error: `{error}`")]
    Read { path: PathBuf, error: io::Error },
    #[error("Failed to parse the config file at `{path}` with the error: `{error}`")]
    Parse {
        path: PathBuf,
        error: serde_json::Error,
    },
    #[error(
        "Stale threshold {stale_after_secs}s must be at least twice and less than three times the heartbeat interval {heartbeat_interval_secs}s"
    )]
    StaleThresholdOutOfRange {
        stale_after_secs: u64,
        heartbeat_interval_secs: u64,
    },
    #[error("Invalid value for '{field}': must be greater than zero")]
    Zero { field: &'static str },
}

/// Reads a JSON config file; missing keys fall back to the defaults.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read(path).map_err(|error| ConfigError::Read {
        path: path.to_path_buf(),
        error,
    })?;
    serde_json::from_slice(&raw).map_err(|error| ConfigError::Parse {
        path: path.to_path_buf(),
        error,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub port: u16,
    /// How often the reaper runs
    pub reap_interval_secs: u64,
    /// Peers not seen for longer than this are evicted
    pub stale_after_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// The list response can be large, so it gets its own write timeout
    pub list_write_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            reap_interval_secs: 15,
            stale_after_secs: 75,
            read_timeout_secs: 10,
            write_timeout_secs: 5,
            list_write_timeout_secs: 10,
        }
    }
}

impl TrackerConfig {
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
    pub fn list_write_timeout(&self) -> Duration {
        Duration::from_secs(self.list_write_timeout_secs)
    }

    /// A peer that misses one heartbeat is seen `2 * heartbeat_interval` ago
    /// by the time its next beat lands, and `3 * heartbeat_interval` ago after
    /// missing two. The threshold has to sit in between.
    pub fn validate(&self, heartbeat_interval: Duration) -> Result<(), ConfigError> {
        if self.reap_interval_secs == 0 {
            return Err(ConfigError::Zero {
                field: "reap_interval_secs",
            });
        }
        let stale_after = self.stale_after();
        if stale_after < heartbeat_interval * 2 || stale_after >= heartbeat_interval * 3 {
            return Err(ConfigError::StaleThresholdOutOfRange {
                stale_after_secs: self.stale_after_secs,
                heartbeat_interval_secs: heartbeat_interval.as_secs(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub tracker_addr: String,
    /// Port the file server listens on
    pub port: u16,
    pub shared_dir: PathBuf,
    /// Address announced to the tracker. Resolved from the local IP and
    /// `port` when unset.
    pub advertise_addr: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub cache_sweep_interval_secs: u64,
    /// Entries in the active-peer cache older than this are dropped
    pub cache_horizon_secs: u64,
    pub connect_timeout_secs: u64,
    pub tracker_timeout_secs: u64,
    pub list_timeout_secs: u64,
    /// Applies to every message and every file chunk of a peer-to-peer download
    pub transfer_timeout_secs: u64,
    pub server_read_timeout_secs: u64,
    pub server_write_timeout_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            tracker_addr: "127.0.0.1:9000".to_owned(),
            port: 9001,
            shared_dir: PathBuf::from("shared"),
            advertise_addr: None,
            heartbeat_interval_secs: 30,
            cache_sweep_interval_secs: 120,
            cache_horizon_secs: 300,
            connect_timeout_secs: 5,
            tracker_timeout_secs: 5,
            list_timeout_secs: 10,
            transfer_timeout_secs: 30,
            server_read_timeout_secs: 30,
            server_write_timeout_secs: 5,
        }
    }
}

impl PeerConfig {
    pub fn new(tracker_addr: impl Into<String>, port: u16, shared_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracker_addr: tracker_addr.into(),
            port,
            shared_dir: shared_dir.into(),
            ..Default::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }
    pub fn cache_horizon(&self) -> Duration {
        Duration::from_secs(self.cache_horizon_secs)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_secs)
    }
    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
    pub fn server_read_timeout(&self) -> Duration {
        Duration::from_secs(self.server_read_timeout_secs)
    }
    pub fn server_write_timeout(&self) -> Duration {
        Duration::from_secs(self.server_write_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("cache_sweep_interval_secs", self.cache_sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(())
    }
}
