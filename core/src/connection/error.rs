//! Error types for control connections.

use std::io;
use thiserror::Error;

/// Failures at the connection boundary.
///
/// Transport errors never escape as panics; they become one of these values
/// and, for send/receive failures, flip the connection to disconnected.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Could not open the stream.
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The operation needs an open connection.
    #[error("not connected to {addr}")]
    NotConnected { addr: String },

    /// Writing to the stream failed.
    #[error("send to {addr} failed: {source}")]
    Send {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A screenshot name that would break out of its frame.
    #[error("invalid screenshot filename {filename:?}: line breaks are not allowed")]
    InvalidFilename { filename: String },

    /// Reading from the stream failed.
    #[error("receive from {addr} failed: {source}")]
    Receive {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    /// True for misuse (operating on a closed connection) rather than a
    /// transport failure
    pub fn is_not_connected(&self) -> bool {
        matches!(self, ConnectionError::NotConnected { .. })
    }
}
