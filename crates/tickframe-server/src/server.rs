//! Server handle, builder and lifecycle.
//!
//! [`Server`] is a cheap-clone handle over shared engine state. The same
//! handle is given to every application callback, so a callback can
//! broadcast, look up clients or disconnect them.
//!
//! # Task model
//!
//! `start` spawns one accept loop and one tick loop. The accept loop spawns
//! one lifecycle task per connection, which spawns one worker per inbound
//! stream and per datagram. Broadcasts spawn one delivery task per
//! recipient. Every one of these goes through a single [`TaskTracker`] and
//! observes a single [`CancellationToken`], so `stop` is a join-all: it
//! returns only when the tracker is empty.
//!
//! # Invariants
//!
//! - A server runs at most once. `Idle -> Running -> Stopped`, never back.
//! - Connection ids come from a per-server counter and are never reused.

use std::{
    fmt,
    marker::PhantomData,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tickframe_proto::{Codec, CodecKind, Message, close_code};
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    client::ClientState,
    config::ServerConfig,
    connection,
    error::ServerError,
    handler::{Handler, HandlerError, panic_message},
    registry::ClientRegistry,
    tick,
    transport::{Connection, ConnectionId, QuinnTransport},
};

/// Application-supplied constructor for per-connection client state.
pub type ClientFactory<T> = dyn Fn(Connection) -> Result<T, HandlerError> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running(SocketAddr),
    Stopped,
}

/// State shared by every clone of a [`Server`] and every engine task.
pub(crate) struct Shared<T, M> {
    pub(crate) config: ServerConfig,
    pub(crate) registry: ClientRegistry<T>,
    pub(crate) handler: Arc<dyn Handler<T, M>>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
    factory: Box<ClientFactory<T>>,
    transport: OnceLock<QuinnTransport>,
    lifecycle: Mutex<Lifecycle>,
    next_id: AtomicU64,
    _message: PhantomData<fn() -> M>,
}

/// Typed QUIC server.
///
/// `T` is the per-connection client state, `M` the decoded message type.
/// Build one with [`Server::builder`], then call [`Server::start`].
///
/// ```no_run
/// use tickframe_server::{BaseClient, Envelope, Server, ServerConfig};
///
/// # async fn run() -> Result<(), tickframe_server::ServerError> {
/// let server = Server::<BaseClient, Envelope>::builder(
///     ServerConfig::default(),
///     BaseClient::from_connection,
/// )
/// .build();
///
/// let addr = server.start()?;
/// println!("listening on {addr}");
/// server.stopped().await;
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Server<T, M> {
    pub(crate) shared: Arc<Shared<T, M>>,
}

impl<T, M> Clone for Server<T, M> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T, M> fmt::Debug for Server<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("bind_address", &self.shared.config.bind_address)
            .field("codec", &self.shared.codec.name())
            .field("clients", &self.shared.registry.len())
            .field("active_tasks", &self.shared.tracker.len())
            .finish()
    }
}

/// Builder for a [`Server`].
pub struct ServerBuilder<T, M> {
    config: ServerConfig,
    factory: Box<ClientFactory<T>>,
    handler: Arc<dyn Handler<T, M>>,
    codec: Arc<dyn Codec>,
}

impl<T, M> ServerBuilder<T, M>
where
    T: ClientState,
    M: Message,
{
    /// Set the application callbacks. Defaults to `()` (every slot unset).
    pub fn handler(mut self, handler: impl Handler<T, M>) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Set the wire codec. Defaults to [`tickframe_proto::JsonCodec`].
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Select one of the built-in codecs.
    pub fn codec_kind(mut self, kind: CodecKind) -> Self {
        self.codec = kind.into_codec();
        self
    }

    /// Finish building. Configuration is validated by [`Server::start`].
    pub fn build(self) -> Server<T, M> {
        Server {
            shared: Arc::new(Shared {
                config: self.config,
                registry: ClientRegistry::new(),
                handler: self.handler,
                codec: self.codec,
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                factory: self.factory,
                transport: OnceLock::new(),
                lifecycle: Mutex::new(Lifecycle::Idle),
                next_id: AtomicU64::new(1),
                _message: PhantomData,
            }),
        }
    }
}

impl<T, M> Server<T, M>
where
    T: ClientState,
    M: Message,
{
    /// Start building a server with the given client factory.
    ///
    /// The factory runs once per accepted connection. An error or panic
    /// rejects that connection before any callback fires.
    pub fn builder<F>(config: ServerConfig, factory: F) -> ServerBuilder<T, M>
    where
        F: Fn(Connection) -> Result<T, HandlerError> + Send + Sync + 'static,
    {
        ServerBuilder {
            config,
            factory: Box::new(factory),
            handler: Arc::new(()),
            codec: CodecKind::default().into_codec(),
        }
    }

    /// Bind the endpoint and spawn the accept loop and tick loop.
    ///
    /// Returns the bound address. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` for invalid configuration or TLS material.
    /// - `ServerError::Transport` if the endpoint cannot bind.
    /// - `ServerError::AlreadyStarted` if the server is running.
    /// - `ServerError::Stopped` if the server was stopped. Servers never
    ///   restart.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Idle => {},
            Lifecycle::Running(_) => return Err(ServerError::AlreadyStarted),
            Lifecycle::Stopped => return Err(ServerError::Stopped),
        }

        let config = &self.shared.config;
        config.validate()?;

        let transport = QuinnTransport::bind(config)?;
        let local_addr = transport.local_addr()?;
        let transport = self.shared.transport.get_or_init(|| transport).clone();

        self.shared.tracker.spawn(accept_loop(self.clone(), transport));
        self.shared.tracker.spawn(tick::run(self.clone()));

        *lifecycle = Lifecycle::Running(local_addr);

        tracing::info!(
            "Server listening on {} (tick rate {}Hz, codec {})",
            local_addr,
            config.tick_rate,
            self.shared.codec.name()
        );

        Ok(local_addr)
    }

    /// Shut down and wait for every engine task to finish.
    ///
    /// Cancels the accept loop, tick loop and every connection, waits for
    /// all in-flight stream workers and deliveries, then closes the endpoint
    /// and waits up to `drain_timeout` for close frames to flush.
    ///
    /// Idempotent. Stopping a server that never started only marks it
    /// stopped. Must not be called from inside a callback; use
    /// [`Server::request_stop`] there.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Stopped);

        self.shared.cancel.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;

        if let Some(transport) = self.shared.transport.get() {
            transport.close(close_code::SHUTDOWN, b"server shutdown");
            let drain = self.shared.config.drain_timeout;
            if tokio::time::timeout(drain, transport.wait_idle()).await.is_err() {
                tracing::debug!("Drain timeout elapsed before all connections closed");
            }
        }

        if let Lifecycle::Running(addr) = previous {
            tracing::info!("Server on {} stopped", addr);
        }
    }

    /// Signal shutdown without waiting. Safe to call from callbacks.
    ///
    /// Every engine task winds down; call [`Server::stop`] afterwards to wait
    /// for them and release the endpoint.
    pub fn request_stop(&self) {
        self.shared.cancel.cancel();
    }

    /// Resolves once shutdown has been requested.
    pub async fn stopped(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// Whether the server is running and no shutdown has been requested.
    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_)) && !self.shared.cancel.is_cancelled()
    }

    /// Address the endpoint is bound to. `None` unless running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.lifecycle() {
            Lifecycle::Running(addr) => Some(addr),
            Lifecycle::Idle | Lifecycle::Stopped => None,
        }
    }

    /// Number of engine tasks still alive: loops, connections, stream
    /// workers and broadcast deliveries. Zero once `stop` returns.
    pub fn active_tasks(&self) -> usize {
        self.shared.tracker.len()
    }

    /// Every registered client, in no particular order.
    pub fn clients(&self) -> Vec<Arc<T>> {
        self.shared.registry.snapshot()
    }

    /// Client registered for a connection.
    pub fn client(&self, id: ConnectionId) -> Option<Arc<T>> {
        self.shared.registry.lookup(id)
    }

    /// Client whose application identifier equals `identifier`.
    pub fn client_by_identifier(&self, identifier: &str) -> Option<Arc<T>> {
        self.shared.registry.find(|client| client.id() == Some(identifier))
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Codec used for every message.
    pub fn codec(&self) -> &dyn Codec {
        self.shared.codec.as_ref()
    }

    pub(crate) fn handler(&self) -> &dyn Handler<T, M> {
        self.shared.handler.as_ref()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.shared.tracker
    }

    pub(crate) fn registry(&self) -> &ClientRegistry<T> {
        &self.shared.registry
    }

    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Run the client factory, isolating panics.
    pub(crate) fn create_client(&self, connection: Connection) -> Result<T, String> {
        let factory = &self.shared.factory;
        match std::panic::catch_unwind(AssertUnwindSafe(|| factory(connection))) {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => Err(format!("client factory failed: {e}")),
            Err(payload) => Err(format!("client factory panicked: {}", panic_message(&*payload))),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.shared.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn accept_loop<T, M>(server: Server<T, M>, transport: QuinnTransport)
where
    T: ClientState,
    M: Message,
{
    let max_connections = server.config().max_connections;
    let admission = Arc::new(Semaphore::new(max_connections.min(Semaphore::MAX_PERMITS)));

    loop {
        let incoming = tokio::select! {
            biased;
            () = server.cancel_token().cancelled() => break,
            incoming = transport.accept() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };

        // A permit covers the handshake as well as the registered lifetime
        let Ok(permit) = Arc::clone(&admission).try_acquire_owned() else {
            tracing::warn!(
                remote = %incoming.remote_address(),
                "Refusing connection: limit of {} clients reached",
                max_connections
            );
            incoming.refuse();
            continue;
        };

        server.tracker().spawn(connection::run(server.clone(), incoming, permit));
    }

    tracing::debug!("Accept loop stopped");
}
