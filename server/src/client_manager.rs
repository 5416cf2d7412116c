//! Broadcast set of joined connections
//!
//! This module tracks which connections receive broadcast notifications:
//! - Connection id assignment for accepted sockets
//! - Registration once a client has taken its seat
//! - Removal on disconnect or when a peer stops keeping up
//! - Capacity enforcement
//!
//! The client manager only holds shared handles; each connection's handler
//! task remains the one that tears it down.

use crate::connection::Connection;
use crate::error::JoinError;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

/// Manages every connection that has joined the game
///
/// Connections are indexed by the id handed out when their socket was
/// accepted. A connection is added while the world is locked for its join,
/// before its snapshot is streamed. Broadcasts raised meanwhile wait in its
/// outbox, which only drains once the snapshot's send guard is released.
pub struct ClientManager {
    /// Joined connections indexed by their id
    clients: HashMap<u32, Arc<Connection>>,
    /// Next id for an accepted socket
    next_client_id: u32,
    /// Maximum number of joined connections
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty broadcast set with the given capacity
    ///
    /// Ids start from 1 and increase for every accepted socket, whether or
    /// not it ever joins.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Hands out the id for a newly accepted socket
    pub fn allocate_id(&mut self) -> u32 {
        let client_id = self.next_client_id;
        self.next_client_id += 1;
        client_id
    }

    /// Adds a joined connection to the broadcast set
    ///
    /// Fails when the set is already at capacity or the connection's
    /// nickname is in use by another member.
    pub fn add_client(&mut self, connection: Arc<Connection>) -> Result<(), JoinError> {
        if self.clients.len() >= self.max_clients {
            return Err(JoinError::ServerFull);
        }
        if let Some(nick) = connection.nick() {
            if self.find_client_by_nick(nick).is_some() {
                return Err(JoinError::NicknameTaken(nick.to_string()));
            }
        }

        info!(
            "Client {} ({}) joined the broadcast set",
            connection.id(),
            connection.nick().unwrap_or("?")
        );
        self.clients.insert(connection.id(), connection);
        Ok(())
    }

    /// Removes a connection, returning it if it was present
    pub fn remove_client(&mut self, client_id: &u32) -> Option<Arc<Connection>> {
        let removed = self.clients.remove(client_id);
        if let Some(connection) = &removed {
            info!("Client {} left the broadcast set", connection.id());
        }
        removed
    }

    pub fn get(&self, client_id: &u32) -> Option<&Arc<Connection>> {
        self.clients.get(client_id)
    }

    /// Finds the connection whose bound nickname is `nick`
    pub fn find_client_by_nick(&self, nick: &str) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, connection)| connection.nick() == Some(nick))
            .map(|(id, _)| *id)
    }

    /// Snapshot of the current members, ordered by id
    ///
    /// Broadcasting walks this copy so the set can change while frames are
    /// being queued.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut connections: Vec<_> = self.clients.values().cloned().collect();
        connections.sort_by_key(|connection| connection.id());
        connections
    }

    /// Returns the number of joined connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no connection has joined
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}

/// Tests cover id assignment, capacity enforcement, nickname uniqueness and
/// membership snapshots.
#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn joined(manager: &mut ClientManager, nick: &str) -> Arc<Connection> {
        let id = manager.allocate_id();
        let (connection, _outbox) = Connection::new(id, test_addr(), tokio::io::sink(), 4);
        connection.bind_nick(nick);
        connection
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients(), 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_ids_increase() {
        let mut manager = ClientManager::new(2);
        assert_eq!(manager.allocate_id(), 1);
        assert_eq!(manager.allocate_id(), 2);
        assert_eq!(manager.allocate_id(), 3);
    }

    #[test]
    fn test_add_client() {
        let mut manager = ClientManager::new(2);
        let connection = joined(&mut manager, "alice");

        manager.add_client(Arc::clone(&connection)).unwrap();
        assert_eq!(manager.len(), 1);
        assert!(!manager.is_empty());
        assert_eq!(manager.get(&connection.id()).unwrap().nick(), Some("alice"));
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let alice = joined(&mut manager, "alice");
        let bob = joined(&mut manager, "bob");

        assert!(manager.add_client(alice).is_ok());
        assert!(manager.is_full());
        assert_eq!(manager.add_client(bob), Err(JoinError::ServerFull));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_duplicate_nick_rejected() {
        let mut manager = ClientManager::new(4);
        let first = joined(&mut manager, "alice");
        let second = joined(&mut manager, "alice");

        manager.add_client(first).unwrap();
        assert_eq!(
            manager.add_client(second),
            Err(JoinError::NicknameTaken("alice".to_string()))
        );
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        let connection = joined(&mut manager, "alice");
        let id = connection.id();
        manager.add_client(connection).unwrap();

        let removed = manager.remove_client(&id);
        assert_eq!(removed.map(|c| c.id()), Some(id));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_remove_nonexistent_client() {
        let mut manager = ClientManager::new(2);
        assert!(manager.remove_client(&999).is_none());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_find_client_by_nick() {
        let mut manager = ClientManager::new(3);
        let alice = joined(&mut manager, "alice");
        let bob = joined(&mut manager, "bob");
        let alice_id = alice.id();
        manager.add_client(alice).unwrap();
        manager.add_client(bob).unwrap();

        assert_eq!(manager.find_client_by_nick("alice"), Some(alice_id));
        assert_eq!(manager.find_client_by_nick("carol"), None);
    }

    #[test]
    fn test_connections_sorted_by_id() {
        let mut manager = ClientManager::new(3);
        let a = joined(&mut manager, "a");
        let b = joined(&mut manager, "b");
        let c = joined(&mut manager, "c");
        manager.add_client(c).unwrap();
        manager.add_client(a).unwrap();
        manager.add_client(b).unwrap();

        let ids: Vec<u32> = manager.connections().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
