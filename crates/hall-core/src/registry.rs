//! Connection registry.
//!
//! Maps (room, participant) to the live connection handle currently serving
//! that participant. Rooms exist only while they have members.

use crate::event::{ParticipantId, RoomId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Something for a connection's writer to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send a serialized text frame.
    Frame(Arc<str>),
    /// Close the transport.
    Close,
}

/// The connection behind a handle is gone.
#[derive(Debug, Clone, Copy, Error)]
#[error("Connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Send-capable handle to one connection.
///
/// Cloning is cheap; all clones address the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Wrap an existing sender under a fresh connection ID.
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: ConnectionId::next(),
            sender,
        }
    }

    /// Create a handle together with the receiver its writer drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's writer has gone away.
    pub fn send_frame(&self, frame: Arc<str>) -> Result<(), ConnectionClosed> {
        self.sender
            .send(Outbound::Frame(frame))
            .map_err(|_| ConnectionClosed(self.id))
    }

    /// Ask the connection's writer to close the transport.
    pub fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }

    /// Check whether the writer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Members of one room at a single point in time, ordered by participant ID.
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    members: Vec<(ParticipantId, ConnectionHandle)>,
}

impl RoomSnapshot {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the room had no members (or did not exist).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Participant IDs in order.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.members.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Check whether a participant was present.
    #[must_use]
    pub fn contains(&self, participant: &str) -> bool {
        self.handle(participant).is_some()
    }

    /// Handle registered for a participant.
    #[must_use]
    pub fn handle(&self, participant: &str) -> Option<&ConnectionHandle> {
        self.members
            .iter()
            .find(|(p, _)| p == participant)
            .map(|(_, h)| h)
    }

    /// Iterate over members.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConnectionHandle)> {
        self.members.iter().map(|(p, h)| (p.as_str(), h))
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of non-empty rooms.
    pub room_count: usize,
    /// Number of registered connections across all rooms.
    pub connection_count: usize,
}

/// Process-wide table of live room memberships.
///
/// Each room's member map lives under one shard lock, so register,
/// unregister and snapshot of the same room are mutually atomic.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: DashMap<RoomId, HashMap<ParticipantId, ConnectionHandle>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant's connection in a room.
    ///
    /// An existing entry for the same participant is replaced and returned;
    /// closing it is up to the caller.
    pub fn register(
        &self,
        participant: &str,
        room: &str,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let connection = handle.id();
        let mut members = self.rooms.entry(room.to_string()).or_insert_with(|| {
            debug!(room = %room, "Creating room");
            HashMap::new()
        });

        let previous = members.insert(participant.to_string(), handle);

        debug!(
            room = %room,
            participant = %participant,
            connection = %connection,
            members = members.len(),
            replaced = previous.is_some(),
            "Registered"
        );

        previous
    }

    /// Remove a participant from a room, whichever connection it is on.
    ///
    /// No-op if absent. Removes the room once it is empty.
    pub fn unregister(&self, participant: &str, room: &str) -> Option<ConnectionHandle> {
        self.remove_where(participant, room, |_| true)
    }

    /// Remove a participant from a room only if the entry still belongs to
    /// the given connection.
    ///
    /// A connection that was superseded by a newer join cannot evict its
    /// successor through this path.
    pub fn unregister_connection(
        &self,
        participant: &str,
        room: &str,
        connection: ConnectionId,
    ) -> Option<ConnectionHandle> {
        self.remove_where(participant, room, |handle| handle.id() == connection)
    }

    fn remove_where(
        &self,
        participant: &str,
        room: &str,
        matches: impl FnOnce(&ConnectionHandle) -> bool,
    ) -> Option<ConnectionHandle> {
        let Entry::Occupied(mut entry) = self.rooms.entry(room.to_string()) else {
            trace!(room = %room, participant = %participant, "Unregister from unknown room");
            return None;
        };

        if !entry.get().get(participant).is_some_and(matches) {
            return None;
        }

        let removed = entry.get_mut().remove(participant);
        debug!(
            room = %room,
            participant = %participant,
            members = entry.get().len(),
            "Unregistered"
        );

        if entry.get().is_empty() {
            entry.remove();
            debug!(room = %room, "Deleted empty room");
        }

        removed
    }

    /// Take an atomic snapshot of a room's members.
    ///
    /// Unknown rooms yield an empty snapshot.
    #[must_use]
    pub fn snapshot(&self, room: &str) -> RoomSnapshot {
        let mut members: Vec<_> = self
            .rooms
            .get(room)
            .map(|m| m.iter().map(|(p, h)| (p.clone(), h.clone())).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        RoomSnapshot { members }
    }

    /// Check if a room currently exists.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of members in a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            connection_count: self.rooms.iter().map(|r| r.len()).sum(),
        }
    }
}
