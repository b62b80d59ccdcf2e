//! Shared fixtures for end-to-end tests: a recording handler, loopback
//! server setup and polling helpers.

#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tickframe_client::{Client, ClientConfig};
use tickframe_server::{
    BaseClient, ConnectionId, DisconnectCause, Envelope, Handler, HandlerError, HasConnection,
    HasIdentifier, Server, ServerConfig, async_trait,
};

pub type TestServer = Server<BaseClient, Envelope>;

/// Everything the recording handler observed.
#[derive(Default)]
pub struct Recorder {
    pub connects: AtomicUsize,
    pub disconnects: Mutex<Vec<(ConnectionId, DisconnectCause)>>,
    pub messages: Mutex<Vec<(ConnectionId, Envelope)>>,
    pub datagrams: AtomicUsize,
    pub ticks: AtomicU64,
    pub slow_started: AtomicBool,
    pub slow_finished: AtomicBool,
    pub slow_datagram_finished: AtomicBool,
    pub reject_connects: AtomicBool,
    pub broadcast_ticks: AtomicBool,
}

impl Recorder {
    pub fn messages_of_kind(&self, kind: &str) -> usize {
        self.messages.lock().unwrap().iter().filter(|(_, m)| m.kind() == kind).count()
    }

    pub fn disconnect_cause(&self, id: ConnectionId) -> Option<DisconnectCause> {
        self.disconnects
            .lock()
            .unwrap()
            .iter()
            .find(|(seen, _)| *seen == id)
            .map(|(_, cause)| cause.clone())
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.lock().unwrap().len()
    }
}

/// Handler that records every callback and implements a few test commands:
///
/// - `chat`: rebroadcast to every client
/// - `join`: set the identifier from a JSON string payload
/// - `echo`: reply to the sender only
/// - `slow`: sleep 200ms inside the callback
/// - `fail`: return an error
/// - `boom`: panic
/// - `shutdown`: request server stop
///
/// Datagrams are echoed back, except a `slow` payload which holds its
/// worker for 300ms instead.
pub struct Recording(pub Arc<Recorder>);

#[async_trait]
impl Handler<BaseClient, Envelope> for Recording {
    async fn on_connect(&self, _server: &TestServer, _client: &Arc<BaseClient>) -> Result<(), HandlerError> {
        if self.0.reject_connects.load(Ordering::SeqCst) {
            return Err("connections are closed".into());
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_disconnect(&self, _server: &TestServer, client: &Arc<BaseClient>, cause: &DisconnectCause) {
        self.0.disconnects.lock().unwrap().push((client.connection_id(), cause.clone()));
    }

    async fn on_message(
        &self,
        server: &TestServer,
        client: &Arc<BaseClient>,
        message: Envelope,
    ) -> Result<(), HandlerError> {
        self.0.messages.lock().unwrap().push((client.connection_id(), message.clone()));

        match message.kind() {
            "chat" => {
                server.broadcast(&message)?;
            },
            "join" => {
                let name: String = message.decode_json()?;
                client.set_id(name)?;
            },
            "echo" => {
                server.send(client, &message).await?;
            },
            "slow" => {
                self.0.slow_started.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.0.slow_finished.store(true, Ordering::SeqCst);
            },
            "fail" => return Err("requested failure".into()),
            "boom" => panic!("requested panic"),
            "shutdown" => server.request_stop(),
            _ => {},
        }

        Ok(())
    }

    async fn on_tick(&self, server: &TestServer) {
        self.0.ticks.fetch_add(1, Ordering::SeqCst);
        if self.0.broadcast_ticks.load(Ordering::SeqCst) {
            let _ = server.broadcast(&Envelope::empty("tick"));
        }
    }

    async fn on_datagram(&self, server: &TestServer, client: &Arc<BaseClient>, data: Bytes) {
        self.0.datagrams.fetch_add(1, Ordering::SeqCst);
        if &data[..] == b"slow" {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.0.slow_datagram_finished.store(true, Ordering::SeqCst);
            return;
        }
        let _ = server.send_datagram(client.connection_id(), data);
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig { drain_timeout: Duration::from_millis(200), ..ServerConfig::localhost() }
}

/// Start a loopback server with the recording handler.
pub fn start_server(config: ServerConfig) -> (TestServer, Arc<Recorder>, String) {
    let recorder = Arc::new(Recorder::default());
    let server = TestServer::builder(config, BaseClient::from_connection)
        .handler(Recording(Arc::clone(&recorder)))
        .build();
    let addr = server.start().unwrap().to_string();
    (server, recorder, addr)
}

pub async fn connect(addr: &str) -> Client {
    tickframe_client::connect(&ClientConfig::development(addr)).await.unwrap()
}

/// Poll `condition` every 10ms until it holds, failing after 5s.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the server has registered `count` clients.
pub async fn wait_for_clients(server: &TestServer, count: usize) {
    eventually(&format!("{count} registered clients"), || server.client_count() == count).await;
}

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
