//! Outbound operations: broadcast fan-out, targeted sends, datagrams and
//! disconnects.
//!
//! Every message is encoded once per call and written to its own
//! server-opened unidirectional stream.
//!
//! # Delivery
//!
//! Broadcasts are best-effort with no delivery confirmation. One delivery
//! task is spawned per recipient and the call returns without waiting, so a
//! slow or dead peer never holds up the caller or any other recipient.
//! Delivery failures are logged at debug level: they almost always mean the
//! peer is disconnecting. Callers needing acknowledgement build it into
//! their message protocol.
//!
//! Recipients come from a registry snapshot taken at call time. A client
//! unregistered after the snapshot may still receive the message or may see
//! the write fail; neither affects other recipients.

use bytes::Bytes;
use tickframe_proto::Message;
use tokio_util::sync::CancellationToken;

use crate::{
    client::ClientState,
    error::SendError,
    server::Server,
    transport::{Connection, ConnectionId},
};

impl<T, M> Server<T, M>
where
    T: ClientState,
    M: Message,
{
    /// Send `message` to every registered client.
    ///
    /// Returns the number of delivery tasks spawned, one per recipient.
    ///
    /// # Errors
    ///
    /// - `SendError::ShuttingDown` once shutdown has been requested.
    /// - `SendError::Protocol` if the message cannot be encoded.
    pub fn broadcast(&self, message: &M) -> Result<usize, SendError> {
        self.broadcast_where(message, |_| true)
    }

    /// Send `message` to every registered client except `except`.
    pub fn broadcast_except(&self, message: &M, except: ConnectionId) -> Result<usize, SendError> {
        self.broadcast_where(message, |client| client.connection_id() != except)
    }

    /// Send `message` to every registered client matching `predicate`.
    ///
    /// The predicate runs on the caller's task, against a snapshot, with no
    /// engine lock held.
    pub fn broadcast_where(
        &self,
        message: &M,
        mut predicate: impl FnMut(&T) -> bool,
    ) -> Result<usize, SendError> {
        if self.cancel_token().is_cancelled() {
            return Err(SendError::ShuttingDown);
        }

        let bytes = self.encode(message)?;
        let mut spawned = 0;

        for client in self.registry().snapshot() {
            if !predicate(&client) {
                continue;
            }

            let delivery = deliver(client.connection().clone(), bytes.clone(), self.cancel_token().clone());
            self.tracker().spawn(delivery);
            spawned += 1;
        }

        tracing::trace!(recipients = spawned, "Broadcast dispatched");

        Ok(spawned)
    }

    /// Send `message` to one client and wait until it is written.
    ///
    /// # Errors
    ///
    /// - `SendError::NotFound` if no client is registered for `id`.
    /// - `SendError::ShuttingDown` if shutdown is requested before the write
    ///   completes.
    /// - `SendError::Protocol` or `SendError::Transport` on encode or write
    ///   failure.
    pub async fn send_to(&self, id: ConnectionId, message: &M) -> Result<(), SendError> {
        let client = self.client(id).ok_or(SendError::NotFound(id))?;
        self.send(&client, message).await
    }

    /// Send `message` to a client already in hand, e.g. inside a callback.
    ///
    /// Does not check registration: sending to a client that just
    /// disconnected fails with `SendError::Transport`.
    pub async fn send(&self, client: &T, message: &M) -> Result<(), SendError> {
        let bytes = self.encode(message)?;

        tokio::select! {
            biased;
            () = self.cancel_token().cancelled() => Err(SendError::ShuttingDown),
            result = client.connection().send_bytes(&bytes) => result,
        }
    }

    /// Send an unreliable datagram to one client.
    ///
    /// # Errors
    ///
    /// - `SendError::NotFound` if no client is registered for `id`.
    /// - `SendError::Transport` if the peer does not accept datagrams or the
    ///   payload exceeds [`Connection::max_datagram_size`].
    pub fn send_datagram(&self, id: ConnectionId, data: Bytes) -> Result<(), SendError> {
        let client = self.client(id).ok_or(SendError::NotFound(id))?;
        client.connection().send_datagram(data)
    }

    /// Close one client's connection with an application close code.
    ///
    /// The connection's lifecycle task observes the close, unregisters the
    /// client and fires `on_disconnect` with
    /// [`crate::DisconnectCause::LocallyClosed`].
    pub fn disconnect(&self, id: ConnectionId, code: u32, reason: &str) -> Result<(), SendError> {
        let client = self.client(id).ok_or(SendError::NotFound(id))?;
        tracing::info!(%id, code, "Disconnecting client: {}", reason);
        client.connection().close(code, reason);
        Ok(())
    }

    fn encode(&self, message: &M) -> Result<Bytes, SendError> {
        let envelope = message.to_envelope()?;
        Ok(self.codec().encode(&envelope)?)
    }
}

async fn deliver(connection: Connection, bytes: Bytes, cancel: CancellationToken) {
    let id = connection.id();

    tokio::select! {
        biased;
        () = cancel.cancelled() => {},
        result = connection.send_bytes(&bytes) => {
            if let Err(e) = result {
                tracing::debug!(%id, "Broadcast delivery failed: {}", e);
            }
        },
    }
}
