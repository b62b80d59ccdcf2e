//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding, decoding, or interpreting envelopes.
///
/// Every variant is fatal for the single message it concerns and nothing
/// else. A peer that sends one malformed message may keep sending valid ones.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Envelope could not be serialized by the codec
    #[error("encode failed: {0}")]
    Encode(String),

    /// Raw bytes are not a valid envelope for the codec
    #[error("decode failed: {0}")]
    Decode(String),

    /// A required envelope field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Envelope type is not understood by the application message type
    #[error("unknown message type: {0:?}")]
    UnknownKind(String),

    /// Payload could not be converted to or from the typed representation
    #[error("invalid payload for {kind:?}: {reason}")]
    Payload {
        /// Envelope type the payload belonged to
        kind: String,
        /// Underlying parse or serialization failure
        reason: String,
    },

    /// Message exceeds [`crate::MAX_MESSAGE_SIZE`]
    #[error("message too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size in bytes
        size: usize,
        /// Permitted maximum
        max: usize,
    },
}
