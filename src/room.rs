//! Room struct definition
//!
//! A named, dynamically created grouping of connections used for scoped
//! delivery. Rooms are owned exclusively by the hub; they are created on
//! first join and pruned when the last member leaves.

use std::sync::Arc;

use crate::connection::Connection;
use crate::types::ConnectionId;

/// A named group of connections
///
/// Members are kept in join order. Membership is by connection identity;
/// joining twice is a no-op.
#[derive(Debug)]
pub struct Room {
    /// Room name for identification
    name: String,
    /// Members in join order
    members: Vec<Arc<Connection>>,
}

impl Room {
    /// Create a new empty room with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// The room's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a connection to the room
    ///
    /// Returns false if the connection is already a member.
    pub fn add(&mut self, conn: Arc<Connection>) -> bool {
        if self.contains(conn.id()) {
            return false;
        }
        self.members.push(conn);
        true
    }

    /// Remove a connection from the room (handle leaving)
    ///
    /// Returns true if the room is now empty and should be deleted.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.members.retain(|c| c.id() != id);
        self.members.is_empty()
    }

    /// Check if a connection is in this room
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.iter().any(|c| c.id() == id)
    }

    /// Members in join order
    pub fn members(&self) -> &[Arc<Connection>] {
        &self.members
    }

    /// Number of members in the room
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use tokio::sync::mpsc;

    fn member() -> Arc<Connection> {
        let (_hub, handle) = Hub::new();
        let (tx, _rx) = mpsc::channel(8);
        Connection::new(handle, tx)
    }

    #[test]
    fn test_room_creation() {
        let room = Room::new("lobby");
        assert_eq!(room.name(), "lobby");
        assert!(room.is_empty());
        assert_eq!(room.len(), 0);
    }

    #[test]
    fn test_room_join_order_preserved() {
        let mut room = Room::new("lobby");
        let a = member();
        let b = member();

        assert!(room.add(Arc::clone(&a)));
        assert!(room.add(Arc::clone(&b)));

        let ids: Vec<_> = room.members().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[test]
    fn test_room_duplicate_join_is_noop() {
        let mut room = Room::new("lobby");
        let a = member();

        assert!(room.add(Arc::clone(&a)));
        assert!(!room.add(Arc::clone(&a)));
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn test_room_contains() {
        let mut room = Room::new("lobby");
        let a = member();
        let b = member();

        room.add(Arc::clone(&a));

        assert!(room.contains(a.id()));
        assert!(!room.contains(b.id()));
    }

    #[test]
    fn test_room_remove_signals_empty() {
        let mut room = Room::new("lobby");
        let a = member();
        let b = member();
        room.add(Arc::clone(&a));
        room.add(Arc::clone(&b));

        assert!(!room.remove(a.id()));
        assert!(room.remove(b.id()));
    }

    #[test]
    fn test_room_remove_absent_member() {
        let mut room = Room::new("lobby");
        let a = member();
        let stranger = member();
        room.add(Arc::clone(&a));

        assert!(!room.remove(stranger.id()));
        assert_eq!(room.len(), 1);
    }
}
