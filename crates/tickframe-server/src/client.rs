//! Per-connection client state.
//!
//! The engine is generic over any application type implementing the three
//! capability traits below. [`BaseClient`] is a ready-made implementation;
//! applications either use it directly, embed it and delegate, or implement
//! the traits on their own fields.
//!
//! Client state is shared as `Arc<T>` between the lifecycle task, stream
//! workers, broadcasts and application callbacks, so every capability works
//! through `&self`. Application fields mutated from several callbacks must
//! bring their own synchronization (atomics, `Mutex`); the engine locks only
//! the metadata store it owns.

use std::{
    collections::HashMap,
    sync::{OnceLock, PoisonError, RwLock},
};

use serde_json::Value;
use thiserror::Error;

use crate::transport::{Connection, ConnectionId};

/// Errors from the set-once client identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// The identifier was already assigned.
    #[error("identifier already set to {0:?}")]
    AlreadySet(String),
}

/// Set-once, read-many application identifier.
#[derive(Debug, Default)]
pub struct Identifier(OnceLock<String>);

impl Identifier {
    /// Create an unset identifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the identifier. Fails if it was already assigned.
    pub fn set(&self, id: impl Into<String>) -> Result<(), IdentifierError> {
        self.0.set(id.into()).map_err(|_| {
            IdentifierError::AlreadySet(self.0.get().cloned().unwrap_or_default())
        })
    }

    /// Current identifier, `None` until assigned.
    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }
}

/// Engine-owned auxiliary key/value store attached to each client.
///
/// Values are JSON so they can be inspected and exported without knowing the
/// application's types. This is not a substitute for typed fields on the
/// client state; keep structured game data in the application type.
///
/// Each call holds the internal lock only for the duration of that call.
#[derive(Debug, Default)]
pub struct Metadata {
    entries: RwLock<HashMap<String, Value>>,
}

impl Metadata {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    /// Insert or replace a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    /// Remove a value, returning it.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(key)
    }

    /// Whether a value exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Access to the client's set-once identifier.
pub trait HasIdentifier {
    /// The identifier cell.
    fn identifier(&self) -> &Identifier;

    /// Current identifier, `None` until assigned.
    fn id(&self) -> Option<&str> {
        self.identifier().get()
    }

    /// Assign the identifier once.
    fn set_id(&self, id: impl Into<String>) -> Result<(), IdentifierError>
    where
        Self: Sized,
    {
        self.identifier().set(id)
    }
}

/// Access to the client's metadata store.
pub trait HasMetadata {
    /// The metadata store.
    fn metadata(&self) -> &Metadata;
}

/// Access to the client's transport connection.
pub trait HasConnection {
    /// The connection this client belongs to.
    fn connection(&self) -> &Connection;

    /// Shorthand for `self.connection().id()`.
    fn connection_id(&self) -> ConnectionId {
        self.connection().id()
    }
}

/// Everything the engine requires from application client state.
///
/// Blanket-implemented; implement the three capability traits instead.
pub trait ClientState: HasIdentifier + HasMetadata + HasConnection + Send + Sync + 'static {}

impl<T> ClientState for T where T: HasIdentifier + HasMetadata + HasConnection + Send + Sync + 'static
{}

/// Default client state: identifier, connection and metadata, nothing else.
#[derive(Debug)]
pub struct BaseClient {
    identifier: Identifier,
    connection: Connection,
    metadata: Metadata,
}

impl BaseClient {
    /// Create client state for a freshly accepted connection.
    pub fn new(connection: Connection) -> Self {
        Self { identifier: Identifier::new(), connection, metadata: Metadata::new() }
    }

    /// Infallible client factory, suitable for [`crate::Server::builder`].
    pub fn from_connection(connection: Connection) -> Result<Self, crate::HandlerError> {
        Ok(Self::new(connection))
    }
}

impl HasIdentifier for BaseClient {
    fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

impl HasMetadata for BaseClient {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl HasConnection for BaseClient {
    fn connection(&self) -> &Connection {
        &self.connection
    }
}
