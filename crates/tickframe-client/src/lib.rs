//! Tickframe client.
//!
//! QUIC connector for tickframe servers, used by the demo client binary and
//! the server's end-to-end tests.
//!
//! # Components
//!
//! - [`connect`]: handshake with a server, returning a [`Client`]
//! - [`Client`]: send envelopes or typed messages, receive what the server
//!   sends, datagrams, graceful close
//! - [`ServerTrust`]: certificate verification policy

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod tls;
mod transport;

pub use error::TransportError;
pub use tickframe_proto::{CodecKind, Envelope, Message, ProtocolError, close_code};
pub use tls::ServerTrust;
pub use transport::{Client, ClientConfig, connect};
