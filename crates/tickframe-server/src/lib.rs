//! Tickframe server engine.
//!
//! A typed connection and message lifecycle engine over QUIC. Applications
//! choose their own per-connection client state `T` and message type `M`,
//! implement [`Handler`] for the callbacks they need, and the engine takes
//! care of accepting connections, dispatching inbound streams, running the
//! tick scheduler, fanning out broadcasts and shutting everything down.
//!
//! # Architecture
//!
//! ```text
//! QuinnTransport -> accept loop -> connection task --register--> ClientRegistry
//!                                       |
//!                                       +-> stream worker -> Codec -> on_message
//!                                       +-> datagram worker ---------> on_datagram
//! tick loop ---------------------------------------------------------> on_tick
//! broadcast -> registry snapshot -> one delivery task per client -> open_uni
//! ```
//!
//! # Components
//!
//! - [`Server`]: cheap-clone handle; lifecycle, admin queries, outbound sends
//! - [`Handler`]: application callback slots, all optional
//! - [`ClientState`]: capability traits any client state type satisfies;
//!   [`BaseClient`] is the ready-made one
//! - [`ClientRegistry`]: concurrent connection-to-client map
//! - [`QuinnTransport`]: QUIC endpoint via Quinn, TLS material from
//!   [`TlsMaterial`]
//!
//! Wire types ([`Envelope`], [`Message`], [`Codec`]) come from
//! [`tickframe_proto`] and are re-exported here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod broadcast;
mod client;
mod config;
mod connection;
mod dispatch;
mod error;
mod handler;
mod registry;
mod server;
mod tick;
mod tls;
mod transport;

pub use async_trait::async_trait;
pub use client::{
    BaseClient, ClientState, HasConnection, HasIdentifier, HasMetadata, Identifier,
    IdentifierError, Metadata,
};
pub use config::{MAX_TICK_RATE, ServerConfig};
pub use connection::ConnectionState;
pub use error::{SendError, ServerError};
pub use handler::{DisconnectCause, Handler, HandlerError};
pub use registry::{ClientRegistry, RegistryError};
pub use server::{ClientFactory, Server, ServerBuilder};
pub use tickframe_proto::{
    CborCodec, Codec, CodecKind, Envelope, JsonCodec, Message, ProtocolError, close_code,
};
pub use tls::TlsMaterial;
pub use transport::{Connection, ConnectionId, QuinnTransport};
