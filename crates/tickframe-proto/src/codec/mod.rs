//! Pluggable wire codecs.
//!
//! A [`Codec`] turns an [`Envelope`] into the bytes written on one stream and
//! back. The server encodes a broadcast once and reuses the bytes for every
//! recipient, so codecs must be deterministic and stateless.

mod cbor;
mod json;

use std::{fmt, str::FromStr, sync::Arc};

use bytes::Bytes;
pub use cbor::CborCodec;
pub use json::JsonCodec;

use crate::{
    MAX_MESSAGE_SIZE,
    envelope::Envelope,
    errors::{ProtocolError, Result},
};

/// Envelope serialization strategy.
///
/// # Invariants
///
/// - `decode(encode(e)) == e` for every envelope the codec accepts
/// - `decode` never panics on arbitrary input
pub trait Codec: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Serialize an envelope.
    fn encode(&self, envelope: &Envelope) -> Result<Bytes>;

    /// Parse an envelope from the full contents of one stream.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope>;
}

/// Built-in codec selector, parsed from configuration and CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    /// [`JsonCodec`]
    #[default]
    Json,
    /// [`CborCodec`]
    Cbor,
}

impl CodecKind {
    /// Instantiate the selected codec.
    pub fn into_codec(self) -> Arc<dyn Codec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Cbor => Arc::new(CborCodec),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Cbor => f.write_str("cbor"),
        }
    }
}

impl FromStr for CodecKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "cbor" | "binary" => Ok(Self::Cbor),
            other => Err(ProtocolError::Decode(format!("unknown codec {other:?}"))),
        }
    }
}

/// Reject encoded messages the receiving side would refuse to read.
fn check_size(buf: Vec<u8>) -> Result<Bytes> {
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge { size: buf.len(), max: MAX_MESSAGE_SIZE });
    }
    Ok(Bytes::from(buf))
}
