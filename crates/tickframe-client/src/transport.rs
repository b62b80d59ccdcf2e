//! QUIC transport for the client.
//!
//! Mirrors the server's stream usage: every outbound message goes on its own
//! client-opened bidirectional stream that is finished after one message,
//! and every inbound message arrives on its own server-opened unidirectional
//! stream. A background task accepts inbound streams, decodes them and
//! queues the envelopes for [`Client::recv`].

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use quinn::{Endpoint, RecvStream};
use tickframe_proto::{Codec, CodecKind, Envelope, MAX_MESSAGE_SIZE, Message, ProtocolError};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{error::TransportError, tls::ServerTrust};

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (e.g., "127.0.0.1:4433")
    pub server_addr: String,
    /// Name the server certificate is checked against
    pub server_name: String,
    /// Certificate trust policy
    pub trust: ServerTrust,
    /// Wire codec, must match the server
    pub codec: CodecKind,
    /// Give up on the handshake after this long
    pub connect_timeout: Duration,
    /// Connection closes after this long without traffic
    pub idle_timeout: Duration,
    /// Interval for transport keep-alive packets, `None` to disable
    pub keep_alive_interval: Option<Duration>,
    /// Largest inbound message read from one stream
    pub max_message_size: usize,
    /// Inbound messages buffered before stream readers wait on `recv`
    pub inbox_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::development("127.0.0.1:4433")
    }
}

impl ClientConfig {
    /// Local development settings: insecure trust, JSON codec.
    pub fn development(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            server_name: "localhost".to_string(),
            trust: ServerTrust::InsecureSkipVerify,
            codec: CodecKind::Json,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            keep_alive_interval: None,
            max_message_size: MAX_MESSAGE_SIZE,
            inbox_capacity: 256,
        }
    }

    fn quinn_config(&self) -> Result<quinn::ClientConfig, TransportError> {
        let crypto = self.trust.quic_client_config()?;
        let mut config = quinn::ClientConfig::new(Arc::new(crypto));

        let idle_timeout = quinn::IdleTimeout::try_from(self.idle_timeout)
            .map_err(|e| TransportError::Config(format!("invalid idle timeout: {e}")))?;
        let mut transport = quinn::TransportConfig::default();
        transport.max_idle_timeout(Some(idle_timeout));
        transport.keep_alive_interval(self.keep_alive_interval);
        config.transport_config(Arc::new(transport));

        Ok(config)
    }
}

/// Connect to a tickframe server.
///
/// # Errors
///
/// - `TransportError::Config` for an invalid address or trust roots.
/// - `TransportError::Connection` if the handshake fails or exceeds
///   `connect_timeout`.
pub async fn connect(config: &ClientConfig) -> Result<Client, TransportError> {
    let addr: SocketAddr = config
        .server_addr
        .parse()
        .map_err(|e| TransportError::Config(format!("invalid address: {e}")))?;

    let bind: SocketAddr = if addr.is_ipv6() {
        SocketAddr::from(([0u16; 8], 0))
    } else {
        SocketAddr::from(([0u8; 4], 0))
    };
    let mut endpoint = Endpoint::client(bind)
        .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(config.quinn_config()?);

    let connecting = endpoint
        .connect(addr, &config.server_name)
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?;

    let connection = tokio::time::timeout(config.connect_timeout, connecting)
        .await
        .map_err(|_| TransportError::Connection("connection timed out".to_string()))?
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

    tracing::debug!("Connected to {}", addr);

    let codec = config.codec.into_codec();
    let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
    let receiver = tokio::spawn(receive_loop(
        connection.clone(),
        Arc::clone(&codec),
        config.max_message_size,
        inbox_tx,
    ));

    Ok(Client { endpoint, connection, codec, inbox: inbox_rx, receiver })
}

/// Handle to a connected client.
///
/// Dropping the handle stops the receive task; call [`Client::close`] first
/// for a graceful close.
pub struct Client {
    endpoint: Endpoint,
    connection: quinn::Connection,
    codec: Arc<dyn Codec>,
    inbox: mpsc::Receiver<Envelope>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Send one envelope on a fresh stream.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = self.codec.encode(envelope)?;

        let (mut send, _recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Stream(format!("open_bi failed: {e}")))?;
        send.write_all(&bytes).await.map_err(|e| TransportError::Stream(format!("write failed: {e}")))?;
        send.finish().map_err(|e| TransportError::Stream(format!("finish failed: {e}")))?;

        Ok(())
    }

    /// Send a typed message.
    pub async fn send_message<M: Message>(&self, message: &M) -> Result<(), TransportError> {
        self.send(&message.to_envelope()?).await
    }

    /// Next message from the server. `None` once the connection closed and
    /// every queued message was consumed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbox.recv().await
    }

    /// Next message from the server, decoded into `M`.
    pub async fn recv_message<M: Message>(&mut self) -> Option<Result<M, ProtocolError>> {
        self.recv().await.map(M::from_envelope)
    }

    /// Wait up to `timeout` for the next message of the given kind, skipping
    /// others.
    pub async fn recv_kind(&mut self, kind: &str, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, async {
            while let Some(envelope) = self.recv().await {
                if envelope.kind() == kind {
                    return Some(envelope);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Send an unreliable datagram.
    pub fn send_datagram(&self, data: Bytes) -> Result<(), TransportError> {
        self.connection
            .send_datagram(data)
            .map_err(|e| TransportError::Stream(format!("datagram failed: {e}")))
    }

    /// Receive the next datagram.
    pub async fn read_datagram(&self) -> Result<Bytes, TransportError> {
        self.connection
            .read_datagram()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    /// Local address of the client endpoint.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.endpoint
            .local_addr()
            .map_err(|e| TransportError::Connection(format!("failed to get local address: {e}")))
    }

    /// Wait until the connection closes and return why.
    pub async fn closed(&self) -> quinn::ConnectionError {
        self.connection.closed().await
    }

    /// Close the connection and wait briefly for the close to reach the
    /// server.
    pub async fn close(self, code: u32, reason: &str) {
        self.connection.close(code.into(), reason.as_bytes());
        self.receiver.abort();
        if tokio::time::timeout(Duration::from_secs(1), self.endpoint.wait_idle()).await.is_err() {
            tracing::debug!("Close did not drain within 1s");
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive_loop(
    connection: quinn::Connection,
    codec: Arc<dyn Codec>,
    max_message_size: usize,
    inbox: mpsc::Sender<Envelope>,
) {
    loop {
        match connection.accept_uni().await {
            Ok(recv) => {
                let codec = Arc::clone(&codec);
                let inbox = inbox.clone();
                tokio::spawn(async move {
                    if let Err(e) = read_message(recv, codec.as_ref(), max_message_size, &inbox).await {
                        tracing::debug!("Incoming stream error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::debug!("Connection closed: {}", e);
                break;
            },
        }
    }
}

/// Read one message from an incoming unidirectional stream (server ->
/// client).
async fn read_message(
    mut recv: RecvStream,
    codec: &dyn Codec,
    max_message_size: usize,
    inbox: &mpsc::Sender<Envelope>,
) -> Result<(), TransportError> {
    let bytes = recv
        .read_to_end(max_message_size)
        .await
        .map_err(|e| TransportError::Stream(format!("read failed: {e}")))?;

    let envelope = codec.decode(&bytes)?;

    inbox
        .send(envelope)
        .await
        .map_err(|e| TransportError::Stream(format!("inbox closed: {e}")))
}
