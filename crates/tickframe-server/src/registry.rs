//! Client registry for connection-to-state tracking.
//!
//! The registry maps each live [`ConnectionId`] to the application's client
//! state. It is the sole owner of client-state lifetime on the engine side:
//! the lifecycle task registers a client before `on_connect` fires and
//! unregisters it before `on_disconnect` fires, so anything enumerating the
//! registry (broadcasts, admin queries) only ever sees connections that are
//! still attached.
//!
//! # Invariants
//!
//! - A connection appears at most once. A second `register` for the same id
//!   is rejected and leaves the first entry untouched.
//! - Entries are inserted fully constructed. Readers never observe a
//!   half-built client.
//! - The internal lock is held only for one insert, remove, lookup or
//!   snapshot. It is never held across an `.await` or an application
//!   callback, so a slow reader cannot stall writers.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use thiserror::Error;

use crate::transport::ConnectionId;

/// Registry operation failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection is already registered. Indicates an engine bug.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// The connection is not registered. Benign during teardown races.
    #[error("connection {0} is not registered")]
    NotFound(ConnectionId),
}

/// Concurrent map from connection id to shared client state.
#[derive(Debug)]
pub struct ClientRegistry<T> {
    clients: RwLock<HashMap<ConnectionId, Arc<T>>>,
}

impl<T> Default for ClientRegistry<T> {
    fn default() -> Self {
        Self { clients: RwLock::new(HashMap::new()) }
    }
}

impl<T> ClientRegistry<T> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client for a connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateConnection` if the id is already present.
    ///   The existing entry is kept.
    pub fn register(&self, id: ConnectionId, client: Arc<T>) -> Result<(), RegistryError> {
        match self.write().entry(id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                slot.insert(client);
                Ok(())
            },
        }
    }

    /// Remove a connection and return its client.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` if the id is not registered.
    pub fn unregister(&self, id: ConnectionId) -> Result<Arc<T>, RegistryError> {
        self.write().remove(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Client registered for `id`, if any.
    pub fn lookup(&self, id: ConnectionId) -> Option<Arc<T>> {
        self.read().get(&id).cloned()
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().contains_key(&id)
    }

    /// First client matching `predicate`. Linear scan over a snapshot.
    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        self.snapshot().into_iter().find(|client| predicate(client))
    }

    /// Point-in-time copy of every registered client, in no particular order.
    ///
    /// Clones the `Arc`s out under the read lock and releases it before
    /// returning. Callers may then await freely.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.read().values().cloned().collect()
    }

    /// Registered connection ids, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read().keys().copied().collect()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the guard cannot leave the map half-updated: every
    // critical section is a single HashMap call. Recover instead of spreading
    // the poison to every other task.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<T>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<T>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ConnectionId {
        ConnectionId::new(raw)
    }

    #[test]
    fn register_and_lookup() {
        let registry = ClientRegistry::new();

        registry.register(id(1), Arc::new("alice")).unwrap();
        registry.register(id(2), Arc::new("bob")).unwrap();

        assert_eq!(registry.lookup(id(1)).as_deref(), Some(&"alice"));
        assert_eq!(registry.lookup(id(2)).as_deref(), Some(&"bob"));
        assert!(registry.lookup(id(3)).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_register_keeps_first_entry() {
        let registry = ClientRegistry::new();

        registry.register(id(1), Arc::new("first")).unwrap();
        let err = registry.register(id(1), Arc::new("second")).unwrap_err();

        assert_eq!(err, RegistryError::DuplicateConnection(id(1)));
        assert_eq!(registry.lookup(id(1)).as_deref(), Some(&"first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_returns_client() {
        let registry = ClientRegistry::new();
        registry.register(id(1), Arc::new(42)).unwrap();

        let client = registry.unregister(id(1)).unwrap();
        assert_eq!(*client, 42);
        assert!(!registry.contains(id(1)));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_missing_is_not_found() {
        let registry = ClientRegistry::<u32>::new();
        assert_eq!(registry.unregister(id(9)).unwrap_err(), RegistryError::NotFound(id(9)));
    }

    #[test]
    fn register_after_unregister_succeeds() {
        let registry = ClientRegistry::new();
        registry.register(id(1), Arc::new(1)).unwrap();
        registry.unregister(id(1)).unwrap();

        assert!(registry.register(id(1), Arc::new(2)).is_ok());
        assert_eq!(registry.lookup(id(1)).as_deref(), Some(&2));
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let registry = ClientRegistry::new();
        registry.register(id(1), Arc::new(1)).unwrap();
        registry.register(id(2), Arc::new(2)).unwrap();

        let snapshot = registry.snapshot();
        registry.unregister(id(1)).unwrap();
        registry.register(id(3), Arc::new(3)).unwrap();

        let mut values: Vec<_> = snapshot.iter().map(|c| **c).collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn snapshot_outlives_removal() {
        let registry = ClientRegistry::new();
        registry.register(id(1), Arc::new(String::from("alive"))).unwrap();

        let snapshot = registry.snapshot();
        drop(registry.unregister(id(1)));

        // Holders of a snapshot keep the state alive until they drop it
        assert_eq!(snapshot[0].as_str(), "alive");
    }

    #[test]
    fn find_by_predicate() {
        let registry = ClientRegistry::new();
        registry.register(id(1), Arc::new("alice")).unwrap();
        registry.register(id(2), Arc::new("bob")).unwrap();

        assert_eq!(registry.find(|name| *name == "bob").as_deref(), Some(&"bob"));
        assert!(registry.find(|name| *name == "carol").is_none());
    }

    #[test]
    fn ids_lists_every_connection() {
        let registry = ClientRegistry::new();
        for raw in 1..=3 {
            registry.register(id(raw), Arc::new(raw)).unwrap();
        }

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec![id(1), id(2), id(3)]);
    }
}
