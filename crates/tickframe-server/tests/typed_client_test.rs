//! A server over an application-defined client type and a typed message
//! enum: state lives on the client, messages are decoded once and anything
//! the enum does not recognise is dropped per message.

mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::{RECV_TIMEOUT, connect, eventually, test_config};
use serde_json::json;
use tickframe_server::{
    Connection, Envelope, Handler, HandlerError, HasConnection, HasIdentifier, HasMetadata,
    Identifier, Message, Metadata, ProtocolError, Server, async_trait,
};

const STARTING_HP: u32 = 100;

struct Player {
    identifier: Identifier,
    metadata: Metadata,
    connection: Connection,
    hp: AtomicU32,
}

impl Player {
    fn spawn(connection: Connection) -> Self {
        Self {
            identifier: Identifier::new(),
            metadata: Metadata::new(),
            connection,
            hp: AtomicU32::new(STARTING_HP),
        }
    }
}

impl HasIdentifier for Player {
    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

impl HasMetadata for Player {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl HasConnection for Player {
    fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Hit(u32),
    Heal(u32),
    Hp(u32),
}

impl Message for Command {
    fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        match envelope.kind() {
            "hit" => Ok(Self::Hit(envelope.decode_json()?)),
            "heal" => Ok(Self::Heal(envelope.decode_json()?)),
            "hp" => Ok(Self::Hp(envelope.decode_json()?)),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }

    fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        match self {
            Self::Hit(amount) => Envelope::json("hit", amount),
            Self::Heal(amount) => Envelope::json("heal", amount),
            Self::Hp(hp) => Envelope::json("hp", hp),
        }
    }
}

type Arena = Server<Player, Command>;

#[derive(Default)]
struct Referee {
    dispatched: AtomicUsize,
}

struct Rules(Arc<Referee>);

#[async_trait]
impl Handler<Player, Command> for Rules {
    async fn on_connect(&self, _server: &Arena, player: &Arc<Player>) -> Result<(), HandlerError> {
        player.metadata().set("class", "knight");
        Ok(())
    }

    async fn on_message(
        &self,
        server: &Arena,
        player: &Arc<Player>,
        message: Command,
    ) -> Result<(), HandlerError> {
        self.0.dispatched.fetch_add(1, Ordering::SeqCst);

        let hp = match message {
            Command::Hit(amount) => {
                let before = player
                    .hp
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |hp| Some(hp.saturating_sub(amount)))
                    .unwrap();
                before.saturating_sub(amount)
            },
            Command::Heal(amount) => player.hp.fetch_add(amount, Ordering::SeqCst) + amount,
            Command::Hp(_) => return Err("clients cannot set hp".into()),
        };

        server.send(player, &Command::Hp(hp)).await?;
        Ok(())
    }
}

fn start_arena() -> (Arena, Arc<Referee>, String) {
    let referee = Arc::new(Referee::default());
    let server = Arena::builder(test_config(), |connection| Ok(Player::spawn(connection)))
        .handler(Rules(Arc::clone(&referee)))
        .build();
    let addr = server.start().unwrap().to_string();
    (server, referee, addr)
}

#[tokio::test]
async fn unknown_kinds_are_dropped_and_typed_messages_dispatched() {
    let (server, referee, addr) = start_arena();

    let mut client = connect(&addr).await;
    eventually("player registered", || server.client_count() == 1).await;

    client.send(&Envelope::json("fly", &json!({"to": "moon"})).unwrap()).await.unwrap();
    client.send(&Envelope::json("hit", "a lot").unwrap()).await.unwrap();
    client.send(&Envelope::json("hit", &7).unwrap()).await.unwrap();

    let reply = client.recv_kind("hp", RECV_TIMEOUT).await.unwrap();
    assert_eq!(Command::from_envelope(reply).unwrap(), Command::Hp(93));

    // Give the dropped streams time to be read and discarded
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(referee.dispatched.load(Ordering::SeqCst), 1);

    let player = &server.clients()[0];
    assert_eq!(player.hp.load(Ordering::SeqCst), 93);
    assert_eq!(player.metadata().get("class"), Some(json!("knight")));
    assert_eq!(server.client_count(), 1);

    server.stop().await;
}

#[tokio::test]
async fn typed_client_state_is_shared_across_messages() {
    let (server, referee, addr) = start_arena();

    let mut client = connect(&addr).await;
    eventually("player registered", || server.client_count() == 1).await;
    let id = server.clients()[0].connection_id();

    client.send_message(&Command::Hit(30)).await.unwrap();
    assert_eq!(client.recv_kind("hp", RECV_TIMEOUT).await.unwrap().decode_json::<u32>().unwrap(), 70);

    client.send_message(&Command::Heal(5)).await.unwrap();
    assert_eq!(client.recv_kind("hp", RECV_TIMEOUT).await.unwrap().decode_json::<u32>().unwrap(), 75);

    // A handler error affects only that message
    client.send_message(&Command::Hp(1_000)).await.unwrap();
    eventually("rejected command dispatched", || referee.dispatched.load(Ordering::SeqCst) == 3).await;

    let player = server.client(id).unwrap();
    assert_eq!(player.hp.load(Ordering::SeqCst), 75);
    assert!(player.set_id("galahad").is_ok());
    assert!(server.client_by_identifier("galahad").is_some());

    server.stop().await;
}
