//! Per-connection lifecycle.
//!
//! One task per accepted connection drives it through
//! `Accepted -> Connected -> Closing -> Closed`:
//!
//! - **Accepted**: the handshake completed and an id was allocated.
//! - **Connected**: the client factory produced state, the client was
//!   registered and `on_connect` succeeded. The task now accepts inbound
//!   streams and datagrams, spawning one worker for each without waiting on
//!   it. At most `max_inflight_datagrams` datagram workers run at once;
//!   datagrams arriving beyond that are dropped.
//! - **Closing**: the transport stopped yielding streams or shutdown was
//!   requested. The client is unregistered before `on_disconnect` fires, so
//!   no broadcast started afterwards can target it.
//! - **Closed**: every worker this connection spawned has finished. The
//!   admission permit taken by the accept loop is released here.
//!
//! Connect-time failures (factory error, duplicate registration, rejected
//! `on_connect`) close only this connection with
//! [`close_code::REJECTED`]. Nothing here can fail the server.

use std::{fmt, sync::Arc};

use tickframe_proto::{Message, close_code};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

use crate::{
    client::ClientState,
    dispatch,
    handler::{DisconnectCause, catch_panic},
    server::Server,
    transport::{Connection, ConnectionId},
};

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake complete, client not yet created
    Accepted,
    /// Registered and dispatching inbound traffic
    Connected,
    /// Unregistered, disconnect callback running
    Closing,
    /// Every worker finished
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

fn transition(id: ConnectionId, from: ConnectionState, to: ConnectionState) {
    tracing::trace!(%id, "Connection state {} -> {}", from, to);
}

/// Drive one incoming connection from handshake to teardown. `_permit` is
/// held for the whole task so it counts against `max_connections`.
pub(crate) async fn run<T, M>(
    server: Server<T, M>,
    incoming: quinn::Incoming,
    _permit: OwnedSemaphorePermit,
) where
    T: ClientState,
    M: Message,
{
    let remote = incoming.remote_address();

    let connecting = match incoming.accept() {
        Ok(connecting) => connecting,
        Err(e) => {
            tracing::debug!(%remote, "Incoming connection failed: {}", e);
            return;
        },
    };

    let inner = tokio::select! {
        biased;
        () = server.cancel_token().cancelled() => return,
        result = connecting => match result {
            Ok(inner) => inner,
            Err(e) => {
                tracing::debug!(%remote, "Handshake failed: {}", e);
                return;
            },
        },
    };

    let connection = Connection::new(server.next_connection_id(), inner);
    let id = connection.id();
    tracing::debug!(%id, %remote, "Connection accepted");

    let Some(client) = establish(&server, connection).await else {
        return;
    };
    transition(id, ConnectionState::Accepted, ConnectionState::Connected);

    let workers = TaskTracker::new();
    let cause = serve(&server, &client, &workers).await;

    transition(id, ConnectionState::Connected, ConnectionState::Closing);
    if let Err(e) = server.registry().unregister(id) {
        tracing::debug!(%id, "Unregister during teardown: {}", e);
    }
    if cause == DisconnectCause::Shutdown {
        client.connection().close(close_code::SHUTDOWN, "server shutdown");
    }

    if cause.is_expected() {
        tracing::debug!(%id, "Client disconnected: {}", cause);
    } else {
        tracing::info!(%id, "Client disconnected: {}", cause);
    }

    notify_disconnect(&server, &client, &cause).await;

    workers.close();
    workers.wait().await;
    transition(id, ConnectionState::Closing, ConnectionState::Closed);
}

/// Create, register and announce the client. `None` if the connection was
/// rejected and already closed.
async fn establish<T, M>(server: &Server<T, M>, connection: Connection) -> Option<Arc<T>>
where
    T: ClientState,
    M: Message,
{
    let id = connection.id();

    if server.cancel_token().is_cancelled() {
        connection.close(close_code::SHUTDOWN, "server shutdown");
        return None;
    }

    let client = match server.create_client(connection.clone()) {
        Ok(client) => Arc::new(client),
        Err(reason) => {
            tracing::warn!(%id, "Rejecting connection: {}", reason);
            connection.close(close_code::REJECTED, "client setup failed");
            return None;
        },
    };

    if let Err(e) = server.registry().register(id, Arc::clone(&client)) {
        tracing::error!(%id, "Client registry invariant violated: {}", e);
        connection.close(close_code::REJECTED, "duplicate connection");
        return None;
    }

    let rejection = match catch_panic(server.handler().on_connect(server, &client)).await {
        Ok(Ok(())) => return Some(client),
        Ok(Err(e)) => e.to_string(),
        Err(panic) => format!("on_connect panicked: {panic}"),
    };

    tracing::warn!(%id, "Connect handler rejected client: {}", rejection);
    if let Err(e) = server.registry().unregister(id) {
        tracing::debug!(%id, "Unregister after rejection: {}", e);
    }
    notify_disconnect(server, &client, &DisconnectCause::ConnectRejected(rejection)).await;
    connection.close(close_code::REJECTED, "connection rejected");

    None
}

/// Accept inbound streams and datagrams until the connection ends or
/// shutdown is requested. Returns why it ended.
async fn serve<T, M>(server: &Server<T, M>, client: &Arc<T>, workers: &TaskTracker) -> DisconnectCause
where
    T: ClientState,
    M: Message,
{
    let id = client.connection_id();
    let connection = client.connection();
    let datagrams = server.config().enable_datagrams;
    let max_datagrams = server.config().max_inflight_datagrams;
    let datagram_slots = Arc::new(Semaphore::new(max_datagrams.min(Semaphore::MAX_PERMITS)));

    loop {
        tokio::select! {
            biased;
            () = server.cancel_token().cancelled() => return DisconnectCause::Shutdown,
            stream = connection.accept_bi() => match stream {
                Ok((send, recv)) => {
                    let worker = dispatch::stream_worker(server.clone(), Arc::clone(client), send, recv);
                    server.tracker().spawn(workers.track_future(worker));
                },
                Err(e) => return DisconnectCause::from(&e),
            },
            datagram = connection.read_datagram(), if datagrams => match datagram {
                Ok(data) => {
                    let Ok(slot) = Arc::clone(&datagram_slots).try_acquire_owned() else {
                        tracing::debug!(%id, "Dropping datagram: {} workers busy", max_datagrams);
                        continue;
                    };
                    let worker = dispatch::datagram_worker(server.clone(), Arc::clone(client), data);
                    server.tracker().spawn(workers.track_future(async move {
                        worker.await;
                        drop(slot);
                    }));
                },
                Err(e) => return DisconnectCause::from(&e),
            },
        }
    }
}

async fn notify_disconnect<T, M>(server: &Server<T, M>, client: &Arc<T>, cause: &DisconnectCause)
where
    T: ClientState,
    M: Message,
{
    if let Err(panic) = catch_panic(server.handler().on_disconnect(server, client, cause)).await {
        tracing::error!(id = %client.connection_id(), "Disconnect handler panicked: {}", panic);
    }
}
