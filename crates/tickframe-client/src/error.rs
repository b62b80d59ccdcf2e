//! Client error types.

use thiserror::Error;
use tickframe_proto::ProtocolError;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid client configuration (address, TLS roots).
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection failed or was lost.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
