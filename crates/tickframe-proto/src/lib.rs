//! Tickframe protocol.
//!
//! Wire-level vocabulary shared by the server engine and clients:
//!
//! - [`Envelope`]: type discriminator plus opaque payload, the unit carried by
//!   one QUIC stream
//! - [`Message`]: conversion between envelopes and application message types
//! - [`Codec`]: pluggable envelope serialization ([`JsonCodec`],
//!   [`CborCodec`])
//!
//! This crate performs no I/O. One stream carries exactly one encoded
//! envelope; the end of the stream delimits the message, so codecs never
//! need length prefixes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
mod envelope;
pub mod errors;
mod message;

pub use codec::{CborCodec, Codec, CodecKind, JsonCodec};
pub use envelope::Envelope;
pub use errors::ProtocolError;
pub use message::Message;

/// ALPN protocol identifier negotiated during the TLS handshake.
pub const ALPN_PROTOCOL: &[u8] = b"tickframe";

/// Largest encoded message accepted on a single stream (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Application close codes sent with `CONNECTION_CLOSE`.
pub mod close_code {
    /// Normal closure initiated by either side.
    pub const NORMAL: u32 = 0;
    /// The server is shutting down.
    pub const SHUTDOWN: u32 = 1;
    /// The server refused the connection during setup.
    pub const REJECTED: u32 = 2;
    /// The application removed the client.
    pub const KICKED: u32 = 1000;
}
