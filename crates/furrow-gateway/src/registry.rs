use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use furrow_types::events::ServerEvent;

pub type ConnId = Uuid;

/// Personal room: every connection of `user_id`, on any device.
pub fn personal_room(user_id: &str) -> String {
    format!("user-{}", user_id)
}

/// Canonical room for a pair of users. Both participants compute the same
/// key no matter who opened the conversation.
pub fn room_key_for(a: &str, b: &str) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("conversation-{}-{}", low, high)
}

/// Broadcast scope as the registry indexes it.
///
/// Ids are opaque and may contain `-`, so the display names from
/// [`personal_room`] and [`room_key_for`] are not unique per pair
/// (`a` + `b-c` and `a-b` + `c` print the same). Membership is keyed on the
/// ids themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Personal(String),
    /// Always stored as the sorted pair
    Conversation(String, String),
}

impl Room {
    pub fn personal(user_id: &str) -> Self {
        Self::Personal(user_id.to_string())
    }

    pub fn conversation(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self::Conversation(low.to_string(), high.to_string())
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Personal(user_id) => f.write_str(&personal_room(user_id)),
            Self::Conversation(a, b) => f.write_str(&room_key_for(a, b)),
        }
    }
}

/// Maps live connections to users and to named broadcast rooms.
///
/// All locks are synchronous and released before returning, so nothing
/// here is ever held across an `.await`.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnId, PresenceEntry>,
    rooms: HashMap<Room, HashSet<ConnId>>,
}

struct PresenceEntry {
    user_id: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<Room>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection. Returns its id and the queue of events to
    /// write to the socket.
    ///
    /// The queue is unbounded: a client that stops reading keeps
    /// accumulating fan-out until the heartbeat drops it (about 30s).
    /// Only `send-message` is rate limited at the source.
    pub fn connect(&self, user_id: &str) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().connections.insert(
            conn_id,
            PresenceEntry {
                user_id: user_id.to_string(),
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Add a connection to a room. Returns true if it was not a member yet;
    /// rejoining is a no-op. Unknown connections are ignored.
    pub fn join(&self, conn_id: ConnId, room: Room) -> bool {
        let mut state = self.write();
        let Some(entry) = state.connections.get_mut(&conn_id) else {
            return false;
        };
        if !entry.rooms.insert(room.clone()) {
            return false;
        }
        state.rooms.entry(room).or_default().insert(conn_id);
        true
    }

    pub fn join_personal_room(&self, conn_id: ConnId, user_id: &str) -> bool {
        self.join(conn_id, Room::personal(user_id))
    }

    pub fn join_conversation_room(&self, conn_id: ConnId, user_id: &str, other_user_id: &str) -> bool {
        self.join(conn_id, Room::conversation(user_id, other_user_id))
    }

    pub fn leave(&self, conn_id: ConnId, room: &Room) -> bool {
        let mut state = self.write();
        let left = state
            .connections
            .get_mut(&conn_id)
            .is_some_and(|entry| entry.rooms.remove(room));
        if left {
            remove_member(&mut state.rooms, room, conn_id);
        }
        left
    }

    /// Deliver `event` to every member of `room` except `exclude`. Returns
    /// how many connections it was queued for; an empty room is not an error.
    pub fn emit_to_room(&self, room: &Room, event: ServerEvent, exclude: Option<ConnId>) -> usize {
        let state = self.read();
        let Some(members) = state.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for conn_id in members {
            if Some(*conn_id) == exclude {
                continue;
            }
            if let Some(entry) = state.connections.get(conn_id) {
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn emit_to_connection(&self, conn_id: ConnId, event: ServerEvent) -> bool {
        self.read()
            .connections
            .get(&conn_id)
            .is_some_and(|entry| entry.tx.send(event).is_ok())
    }

    /// Remove a connection and all of its room memberships.
    pub fn disconnect(&self, conn_id: ConnId) {
        let mut state = self.write();
        let Some(entry) = state.connections.remove(&conn_id) else {
            return;
        };
        for room in &entry.rooms {
            remove_member(&mut state.rooms, room, conn_id);
        }
        debug!("Connection {} of {} removed from {} rooms", conn_id, entry.user_id, entry.rooms.len());
    }

    /// Drop every connection. Their event queues close, which ends each
    /// connection loop.
    pub fn shutdown(&self) {
        let mut state = self.write();
        state.connections.clear();
        state.rooms.clear();
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    /// Live connections owned by `user_id`.
    pub fn connections_for_user(&self, user_id: &str) -> usize {
        self.read()
            .connections
            .values()
            .filter(|entry| entry.user_id == user_id)
            .count()
    }

    pub fn room_size(&self, room: &Room) -> usize {
        self.read().rooms.get(room).map_or(0, HashSet::len)
    }

    pub fn is_member(&self, conn_id: ConnId, room: &Room) -> bool {
        self.read()
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(&conn_id))
    }
}

fn remove_member(rooms: &mut HashMap<Room, HashSet<ConnId>>, room: &Room, conn_id: ConnId) {
    if let Some(members) = rooms.get_mut(room) {
        members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use furrow_types::events::{ServerEvent, UserTypingPayload};

    fn typing(sender: &str) -> ServerEvent {
        ServerEvent::UserTyping(UserTypingPayload {
            sender_id: sender.into(),
            is_typing: true,
        })
    }

    #[test]
    fn room_key_is_symmetric() {
        let pairs = [("u1", "u2"), ("alice", "bob"), ("b", "a"), ("10", "9"), ("x", "x")];
        for (a, b) in pairs {
            assert_eq!(room_key_for(a, b), room_key_for(b, a));
        }
        assert_eq!(room_key_for("u2", "u1"), "conversation-u1-u2");
        // Lexicographic, not numeric
        assert_eq!(room_key_for("9", "10"), "conversation-10-9");
        assert_eq!(Room::conversation("u2", "u1"), Room::conversation("u1", "u2"));
        assert_eq!(Room::conversation("u2", "u1").to_string(), "conversation-u1-u2");
        assert_eq!(Room::personal("u1").to_string(), "user-u1");
    }

    #[test]
    fn hyphenated_ids_get_separate_rooms() {
        // Both pairs print as conversation-a-b-c
        assert_eq!(room_key_for("a", "b-c"), room_key_for("a-b", "c"));
        assert_ne!(Room::conversation("a", "b-c"), Room::conversation("a-b", "c"));

        let registry = Registry::new();
        let (a, _rx_a) = registry.connect("a");
        let (ab, mut rx_ab) = registry.connect("a-b");
        registry.join_conversation_room(a, "a", "b-c");
        registry.join_conversation_room(ab, "a-b", "c");

        let delivered = registry.emit_to_room(&Room::conversation("b-c", "a"), typing("a"), Some(a));
        assert_eq!(delivered, 0);
        assert!(rx_ab.try_recv().is_err());
        assert_eq!(registry.room_size(&Room::conversation("a", "b-c")), 1);
        assert_eq!(registry.room_size(&Room::conversation("c", "a-b")), 1);
    }

    #[test]
    fn rejoining_is_a_noop() {
        let registry = Registry::new();
        let (conn, mut rx) = registry.connect("u1");

        assert!(registry.join_personal_room(conn, "u1"));
        assert!(!registry.join_personal_room(conn, "u1"));

        assert_eq!(registry.emit_to_room(&Room::personal("u1"), typing("u2"), None), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn both_participants_land_in_one_room() {
        let registry = Registry::new();
        let (a, mut rx_a) = registry.connect("u1");
        let (b, mut rx_b) = registry.connect("u2");

        registry.join_conversation_room(a, "u1", "u2");
        registry.join_conversation_room(b, "u2", "u1");

        let room = Room::conversation("u1", "u2");
        assert_eq!(registry.emit_to_room(&room, typing("u1"), Some(a)), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), typing("u1"));
    }

    #[test]
    fn disconnect_clears_memberships() {
        let registry = Registry::new();
        let (phone, _rx1) = registry.connect("u1");
        let (laptop, mut rx2) = registry.connect("u1");
        registry.join_personal_room(phone, "u1");
        registry.join_personal_room(laptop, "u1");
        assert_eq!(registry.connections_for_user("u1"), 2);

        registry.disconnect(phone);
        assert!(!registry.is_member(phone, &Room::personal("u1")));
        assert_eq!(registry.emit_to_room(&Room::personal("u1"), typing("u2"), None), 1);
        assert!(rx2.try_recv().is_ok());

        registry.disconnect(laptop);
        assert_eq!(registry.emit_to_room(&Room::personal("u1"), typing("u2"), None), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn leave_and_shutdown() {
        let registry = Registry::new();
        let (conn, mut rx) = registry.connect("u1");
        let room = Room::conversation("u1", "u2");
        registry.join(conn, room.clone());

        assert!(registry.leave(conn, &room));
        assert!(!registry.leave(conn, &room));
        assert_eq!(registry.emit_to_room(&room, typing("u2"), None), 0);

        registry.shutdown();
        assert!(!registry.emit_to_connection(conn, typing("u2")));
        // Sender dropped, so the connection loop sees a closed queue
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
