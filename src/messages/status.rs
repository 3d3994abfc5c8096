use std::fmt;

use serde::{Deserialize, Serialize};

/// The `status` field of a response: "ok" or an error phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Ok,
    PeerNotRegistered,
    FileNotFound,
    ServerError,
    MissingAddress,
    /// any phrase this side doesn't know, kept verbatim
    Other(String),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        *self == Status::Ok
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Ok => "ok",
            Status::PeerNotRegistered => "peer not registered",
            Status::FileNotFound => "file not found",
            Status::ServerError => "server error",
            Status::MissingAddress => "missing address",
            Status::Other(phrase) => phrase,
        }
    }
}

impl From<String> for Status {
    fn from(phrase: String) -> Self {
        match phrase.as_str() {
            "ok" => Status::Ok,
            "peer not registered" => Status::PeerNotRegistered,
            "file not found" => Status::FileNotFound,
            "server error" => Status::ServerError,
            "missing address" => Status::MissingAddress,
            _ => Status::Other(phrase),
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.as_str().to_owned()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
