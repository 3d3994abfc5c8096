//! A small peer-to-peer file sharing overlay.
//!
//! A [`Tracker`] keeps track of which peers are alive and which files they
//! advertise. A [`Peer`] registers its shared directory with the tracker, asks
//! it where a file lives and then fetches the file directly from another
//! peer's [`FileServer`], falling back to the next candidate on failure.

pub mod config;
pub mod conn;
pub mod messages;
pub mod peer;
pub mod periodic;
pub mod prompt;
pub mod tracker;

pub use config::{PeerConfig, TrackerConfig};
pub use messages::{Command, Message, Status};
pub use peer::{FileServer, Peer, PeerError};
pub use tracker::{Registry, Tracker, TrackerError};
