//! Message envelope.
//!
//! An [`Envelope`] is the unit every codec moves over the wire: a type
//! discriminator plus opaque payload bytes. The engine never looks inside the
//! payload; applications convert it into their own message type exactly once
//! (see [`crate::Message`]).

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// Type discriminator plus opaque payload.
///
/// # Invariants
///
/// - Immutable after construction. Fields are private and only exposed
///   through borrowing accessors.
/// - Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    kind: String,
    payload: Bytes,
}

impl Envelope {
    /// Create an envelope from a type and raw payload bytes.
    pub fn new(kind: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { kind: kind.into(), payload: payload.into() }
    }

    /// Create an envelope with no payload.
    pub fn empty(kind: impl Into<String>) -> Self {
        Self::new(kind, Bytes::new())
    }

    /// Create an envelope whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(kind: impl Into<String>, value: &T) -> Result<Self> {
        let kind = kind.into();
        let payload = serde_json::to_vec(value)
            .map_err(|e| ProtocolError::Payload { kind: kind.clone(), reason: e.to_string() })?;
        Ok(Self { kind, payload: Bytes::from(payload) })
    }

    /// Type discriminator.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Parse the payload as JSON into `T`.
    ///
    /// An empty payload is parsed as JSON `null`, so `Option<_>` and unit
    /// structs accept envelopes without data.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes: &[u8] = if self.payload.is_empty() { b"null" } else { &self.payload };
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Payload { kind: self.kind.clone(), reason: e.to_string() })
    }

    /// Split into type and payload.
    pub fn into_parts(self) -> (String, Bytes) {
        (self.kind, self.payload)
    }
}
