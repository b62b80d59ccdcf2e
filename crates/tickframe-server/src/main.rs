//! Tickframe demo server.
//!
//! A small chat server over [`BaseClient`]: clients join a room with a name,
//! chat messages are rebroadcast to everyone in the same room, `ping` is
//! answered with `pong`, and the tick loop logs (and optionally broadcasts)
//! server stats once per second.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! tickframe-server --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate (production)
//! tickframe-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tickframe_server::{
    BaseClient, CodecKind, DisconnectCause, Envelope, Handler, HandlerError, HasConnection,
    HasIdentifier, HasMetadata, Message, ProtocolError, Server, ServerConfig, TlsMaterial,
    close_code,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tickframe demo chat server
#[derive(Parser, Debug)]
#[command(name = "tickframe-server")]
#[command(about = "Tickframe demo chat server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Tick scheduler frequency (ticks per second)
    #[arg(long, default_value = "60")]
    tick_rate: u32,

    /// Wire codec (json, cbor)
    #[arg(long, default_value = "json")]
    codec: CodecKind,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Broadcast a stats message to every client once per second
    #[arg(long)]
    broadcast_stats: bool,

    /// Let clients kick each other by name
    #[arg(long)]
    allow_kick: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

const DEFAULT_ROOM: &str = "lobby";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Join {
    name: String,
    #[serde(default)]
    room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Chat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Presence {
    name: String,
    room: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Kick {
    target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Stats {
    tick: u64,
    clients: usize,
}

/// Messages understood by the demo server.
#[derive(Debug, Clone, PartialEq)]
enum ChatMessage {
    Join(Join),
    Ping,
    Pong,
    Chat(Chat),
    Joined(Presence),
    Left(Presence),
    Kick(Kick),
    Stats(Stats),
}

impl Message for ChatMessage {
    fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        match envelope.kind() {
            "join" => Ok(Self::Join(envelope.decode_json()?)),
            "ping" => Ok(Self::Ping),
            "pong" => Ok(Self::Pong),
            "chat" => Ok(Self::Chat(envelope.decode_json()?)),
            "joined" => Ok(Self::Joined(envelope.decode_json()?)),
            "left" => Ok(Self::Left(envelope.decode_json()?)),
            "kick" => Ok(Self::Kick(envelope.decode_json()?)),
            "stats" => Ok(Self::Stats(envelope.decode_json()?)),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }

    fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        match self {
            Self::Join(join) => Envelope::json("join", join),
            Self::Ping => Ok(Envelope::empty("ping")),
            Self::Pong => Ok(Envelope::empty("pong")),
            Self::Chat(chat) => Envelope::json("chat", chat),
            Self::Joined(presence) => Envelope::json("joined", presence),
            Self::Left(presence) => Envelope::json("left", presence),
            Self::Kick(kick) => Envelope::json("kick", kick),
            Self::Stats(stats) => Envelope::json("stats", stats),
        }
    }
}

type ChatServer = Server<BaseClient, ChatMessage>;

struct ChatHandler {
    ticks: AtomicU64,
    tick_rate: u64,
    broadcast_stats: bool,
    allow_kick: bool,
}

fn room_of(client: &BaseClient) -> String {
    client
        .metadata()
        .get("room")
        .and_then(|room| room.as_str().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_ROOM.to_string())
}

fn name_of(client: &BaseClient) -> String {
    client.id().map_or_else(|| client.connection_id().to_string(), str::to_string)
}

#[async_trait]
impl Handler<BaseClient, ChatMessage> for ChatHandler {
    async fn on_connect(&self, _server: &ChatServer, client: &Arc<BaseClient>) -> Result<(), HandlerError> {
        tracing::info!(
            id = %client.connection_id(),
            remote = %client.connection().remote_addr(),
            "Client connected"
        );
        client.metadata().set("room", DEFAULT_ROOM);
        Ok(())
    }

    async fn on_disconnect(&self, server: &ChatServer, client: &Arc<BaseClient>, cause: &DisconnectCause) {
        let Some(name) = client.id() else {
            return;
        };
        let room = room_of(client);
        tracing::info!(%name, %room, "Client left: {}", cause);

        let left = ChatMessage::Left(Presence { name: name.to_string(), room: room.clone() });
        if let Err(e) = server.broadcast_where(&left, |other| room_of(other) == room) {
            tracing::debug!("Presence broadcast skipped: {}", e);
        }
    }

    async fn on_message(
        &self,
        server: &ChatServer,
        client: &Arc<BaseClient>,
        message: ChatMessage,
    ) -> Result<(), HandlerError> {
        match message {
            ChatMessage::Join(join) => {
                if server.client_by_identifier(&join.name).is_some() {
                    return Err(format!("name '{}' is taken", join.name).into());
                }
                client.set_id(join.name.clone())?;

                let room = join.room.unwrap_or_else(|| DEFAULT_ROOM.to_string());
                client.metadata().set("room", room.as_str());

                tracing::info!(name = %join.name, %room, "Client joined");
                let joined = ChatMessage::Joined(Presence { name: join.name, room: room.clone() });
                server.broadcast_where(&joined, |other| room_of(other) == room)?;
            },
            ChatMessage::Ping => {
                server.send(client, &ChatMessage::Pong).await?;
            },
            ChatMessage::Chat(chat) => {
                let room = room_of(client);
                let chat = ChatMessage::Chat(Chat { from: Some(name_of(client)), text: chat.text });
                server.broadcast_where(&chat, |other| room_of(other) == room)?;
            },
            ChatMessage::Kick(kick) => {
                if !self.allow_kick {
                    return Err("kicking is disabled".into());
                }
                let target = server
                    .client_by_identifier(&kick.target)
                    .ok_or_else(|| format!("no client named '{}'", kick.target))?;
                server.disconnect(target.connection_id(), close_code::KICKED, "kicked")?;
            },
            other => {
                return Err(format!("unexpected message from client: {other:?}").into());
            },
        }

        Ok(())
    }

    async fn on_tick(&self, server: &ChatServer) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if tick % self.tick_rate != 0 {
            return;
        }

        let clients = server.client_count();
        if tick % (self.tick_rate * 10) == 0 {
            tracing::info!(tick, clients, active_tasks = server.active_tasks(), "Server stats");
        }

        if !self.broadcast_stats {
            return;
        }
        if let Err(e) = server.broadcast(&ChatMessage::Stats(Stats { tick, clients })) {
            tracing::debug!("Stats broadcast skipped: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Tickframe server starting");
    tracing::info!("Binding to {}", args.bind);

    let tls = TlsMaterial::from_paths(args.cert, args.key);
    if tls.is_self_signed() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let config = ServerConfig {
        bind_address: args.bind,
        tick_rate: args.tick_rate,
        tls,
        max_connections: args.max_connections,
        keep_alive_interval: Some(Duration::from_secs(15)),
        ..ServerConfig::default()
    };

    let handler = ChatHandler {
        ticks: AtomicU64::new(0),
        tick_rate: u64::from(args.tick_rate.max(1)),
        broadcast_stats: args.broadcast_stats,
        allow_kick: args.allow_kick,
    };

    let server: ChatServer = Server::builder(config, BaseClient::from_connection)
        .handler(handler)
        .codec_kind(args.codec)
        .build();

    let addr = server.start()?;
    tracing::info!("Server listening on {}", addr);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutdown requested");
        },
        () = server.stopped() => {},
    }

    server.stop().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn round_trip(message: &ChatMessage) -> ChatMessage {
        ChatMessage::from_envelope(message.to_envelope().unwrap()).unwrap()
    }

    #[test]
    fn messages_survive_envelope_round_trip() {
        let messages = [
            ChatMessage::Join(Join { name: "alice".to_string(), room: Some("den".to_string()) }),
            ChatMessage::Ping,
            ChatMessage::Pong,
            ChatMessage::Chat(Chat { from: Some("alice".to_string()), text: "hi".to_string() }),
            ChatMessage::Joined(Presence { name: "bob".to_string(), room: "lobby".to_string() }),
            ChatMessage::Left(Presence { name: "bob".to_string(), room: "lobby".to_string() }),
            ChatMessage::Kick(Kick { target: "mallory".to_string() }),
            ChatMessage::Stats(Stats { tick: 120, clients: 3 }),
        ];

        for message in &messages {
            assert_eq!(&round_trip(message), message);
        }
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let join = Envelope::json("join", &json!({ "name": "alice" })).unwrap();
        assert_eq!(
            ChatMessage::from_envelope(join).unwrap(),
            ChatMessage::Join(Join { name: "alice".to_string(), room: None })
        );

        let chat = Envelope::json("chat", &json!({ "text": "hello" })).unwrap();
        assert_eq!(
            ChatMessage::from_envelope(chat).unwrap(),
            ChatMessage::Chat(Chat { from: None, text: "hello".to_string() })
        );
    }

    #[test]
    fn outgoing_chat_omits_missing_sender() {
        let chat = ChatMessage::Chat(Chat { from: None, text: "hi".to_string() });
        let envelope = chat.to_envelope().unwrap();
        assert_eq!(envelope.decode_json::<serde_json::Value>().unwrap(), json!({ "text": "hi" }));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = ChatMessage::from_envelope(Envelope::empty("teleport")).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(kind) if kind == "teleport"));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let bad = Envelope::json("stats", &json!({ "tick": "soon" })).unwrap();
        assert!(matches!(ChatMessage::from_envelope(bad), Err(ProtocolError::Payload { .. })));

        let missing = Envelope::json("kick", &json!({})).unwrap();
        assert!(ChatMessage::from_envelope(missing).is_err());
    }
}
