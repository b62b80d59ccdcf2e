//! Server error types.
//!
//! Errors are split by who can observe them. [`ServerError`] reaches the
//! caller of [`crate::Server::start`]; [`SendError`] reaches callers of the
//! outbound operations. Failures inside per-connection and per-stream tasks
//! never surface here. They are logged and turned into a teardown or a
//! [`crate::DisconnectCause`].

use std::io;

use thiserror::Error;
use tickframe_proto::ProtocolError;

use crate::transport::ConnectionId;

/// Errors that prevent the server from reaching or leaving the running state.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, bad TLS material, zero tick
    /// rate, etc.).
    ///
    /// Fatal to startup. Fix configuration and call `start` on a new server.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error while creating the endpoint (address in use, socket
    /// failure).
    ///
    /// Fatal to startup.
    #[error("transport error: {0}")]
    Transport(String),

    /// `start` was called on a server that is already running.
    #[error("server already started")]
    AlreadyStarted,

    /// `start` was called after `stop`. Servers never restart.
    #[error("server has been stopped")]
    Stopped,
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors from outbound operations (`send_to`, `broadcast`, datagrams).
#[derive(Error, Debug)]
pub enum SendError {
    /// No client is registered for the connection.
    ///
    /// Benign: the connection may have closed between lookup and send.
    #[error("connection not found: {0}")]
    NotFound(ConnectionId),

    /// The server is shutting down and accepts no new outbound work.
    #[error("server is shutting down")]
    ShuttingDown,

    /// The message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport rejected the write (connection lost, stream reset,
    /// datagrams unsupported by the peer).
    #[error("transport error on {connection}: {reason}")]
    Transport {
        /// Connection the write targeted
        connection: ConnectionId,
        /// Transport-level failure
        reason: String,
    },
}

impl SendError {
    /// Whether the failure is an expected race with a disconnecting peer.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ShuttingDown)
    }
}
