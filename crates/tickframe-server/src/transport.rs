//! Quinn-based QUIC transport.
//!
//! Production QUIC transport using the Quinn library. Provides encrypted,
//! multiplexed streams and unreliable datagrams over UDP with TLS 1.3. ALPN is
//! set to "tickframe" so only compatible peers complete the handshake.
//!
//! # Stream usage
//!
//! - Inbound: every client message arrives on its own client-opened
//!   bidirectional stream. The client finishes its send side after one
//!   message; the server never writes to the paired send half.
//! - Outbound: every server message is written to its own server-opened
//!   unidirectional stream, finished after one message.

use std::{fmt, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use quinn::{Endpoint, RecvStream, SendStream};

use crate::{
    config::ServerConfig,
    error::{SendError, ServerError},
};

/// Engine-assigned connection identity.
///
/// Allocated from a per-server monotonic counter when the handshake
/// completes. Never reused for the lifetime of a server, so a stale id can
/// only ever miss, never hit a different peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// QUIC endpoint accepting client connections.
#[derive(Clone)]
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind the endpoint described by `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let crypto = config.tls.quic_server_config()?;

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        server_config.transport_config(Arc::new(transport_config(config)?));

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!("QUIC transport bound to {}", endpoint.local_addr()?);

        Ok(Self { endpoint })
    }

    /// Next incoming connection attempt. `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Close every connection and stop accepting new ones.
    pub fn close(&self, code: u32, reason: &[u8]) {
        self.endpoint.close(code.into(), reason);
    }

    /// Wait until every connection has finished closing.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}

fn transport_config(config: &ServerConfig) -> Result<quinn::TransportConfig, ServerError> {
    let idle_timeout = quinn::IdleTimeout::try_from(config.idle_timeout)
        .map_err(|e| ServerError::Config(format!("invalid idle timeout: {e}")))?;

    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle_timeout));
    transport.keep_alive_interval(config.keep_alive_interval);
    if !config.enable_datagrams {
        transport.datagram_receive_buffer_size(None);
    }

    Ok(transport)
}

/// A live QUIC connection plus its engine-assigned id.
///
/// # Cloning
///
/// Clones are cheap and share the same underlying QUIC connection. The
/// connection's lifecycle task and every client-state handle hold one.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    inner: quinn::Connection,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, inner: quinn::Connection) -> Self {
        Self { id, inner }
    }

    /// Engine-assigned id, the key of the client registry.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    /// Accept the next client-opened bidirectional stream.
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), quinn::ConnectionError> {
        self.inner.accept_bi().await
    }

    /// Open a unidirectional stream towards the client.
    pub async fn open_uni(&self) -> Result<SendStream, quinn::ConnectionError> {
        self.inner.open_uni().await
    }

    /// Write one already-encoded message on a fresh outbound stream.
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<(), SendError> {
        let transport_err = |reason: String| SendError::Transport { connection: self.id, reason };

        let mut stream =
            self.open_uni().await.map_err(|e| transport_err(format!("open_uni failed: {e}")))?;
        stream.write_all(bytes).await.map_err(|e| transport_err(format!("write failed: {e}")))?;
        stream.finish().map_err(|e| transport_err(format!("finish failed: {e}")))?;

        Ok(())
    }

    /// Receive the next datagram from the client.
    pub async fn read_datagram(&self) -> Result<Bytes, quinn::ConnectionError> {
        self.inner.read_datagram().await
    }

    /// Send an unreliable datagram to the client.
    pub fn send_datagram(&self, data: Bytes) -> Result<(), SendError> {
        self.inner.send_datagram(data).map_err(|e| SendError::Transport {
            connection: self.id,
            reason: format!("datagram failed: {e}"),
        })
    }

    /// Largest datagram the peer currently accepts. `None` if unsupported.
    pub fn max_datagram_size(&self) -> Option<usize> {
        self.inner.max_datagram_size()
    }

    /// Close the connection with an application error code and reason.
    pub fn close(&self, code: u32, reason: &str) {
        self.inner.close(code.into(), reason.as_bytes());
    }

    /// Why the connection closed, if it has.
    pub fn close_reason(&self) -> Option<quinn::ConnectionError> {
        self.inner.close_reason()
    }

    /// Whether the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.inner.close_reason().is_some()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}
