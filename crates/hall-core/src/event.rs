//! Room events.
//!
//! An [`Event`] is what the hub fans out to a room. It is converted to a
//! wire [`ServerMessage`] and serialized once per publish.

use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use studyhall_protocol::{codec, ProtocolError, ServerMessage};

/// A room identifier.
pub type RoomId = String;

/// A participant identifier.
pub type ParticipantId = String;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// The origin participant joined.
    Joined,
    /// The origin participant left.
    Left,
    /// The origin participant said something.
    Chat { message: String },
    /// Current members of the room.
    PresenceSnapshot { participants: Vec<ParticipantId> },
    /// A request was rejected.
    Error { message: String },
    /// Relayed timer state.
    TimerUpdate { timer_state: Value },
    /// Relayed task list of the origin participant.
    TaskUpdate { tasks: Value },
}

/// An immutable room event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Room the event belongs to.
    pub room_id: RoomId,
    /// Participant that caused the event, if any.
    pub origin: Option<ParticipantId>,
    /// Event payload.
    pub payload: EventPayload,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Event {
    /// Create a new event stamped with the current time.
    #[must_use]
    pub fn new(room_id: impl Into<RoomId>, payload: EventPayload) -> Self {
        Self {
            room_id: room_id.into(),
            origin: None,
            payload,
            timestamp: now_millis(),
        }
    }

    /// Set the originating participant.
    #[must_use]
    pub fn with_origin(mut self, participant: impl Into<ParticipantId>) -> Self {
        self.origin = Some(participant.into());
        self
    }

    #[must_use]
    pub fn joined(room_id: impl Into<RoomId>, participant: impl Into<ParticipantId>) -> Self {
        Self::new(room_id, EventPayload::Joined).with_origin(participant)
    }

    #[must_use]
    pub fn left(room_id: impl Into<RoomId>, participant: impl Into<ParticipantId>) -> Self {
        Self::new(room_id, EventPayload::Left).with_origin(participant)
    }

    #[must_use]
    pub fn chat(
        room_id: impl Into<RoomId>,
        participant: impl Into<ParticipantId>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            room_id,
            EventPayload::Chat {
                message: message.into(),
            },
        )
        .with_origin(participant)
    }

    #[must_use]
    pub fn presence_snapshot(room_id: impl Into<RoomId>, participants: Vec<ParticipantId>) -> Self {
        Self::new(room_id, EventPayload::PresenceSnapshot { participants })
    }

    #[must_use]
    pub fn error(room_id: impl Into<RoomId>, message: impl Into<String>) -> Self {
        Self::new(
            room_id,
            EventPayload::Error {
                message: message.into(),
            },
        )
    }

    /// Convert to the wire message delivered to clients.
    #[must_use]
    pub fn to_server_message(&self) -> ServerMessage {
        let user_id = self.origin.clone().unwrap_or_default();
        let timestamp = self.timestamp;

        match &self.payload {
            EventPayload::Joined => ServerMessage::UserJoined { user_id, timestamp },
            EventPayload::Left => ServerMessage::UserLeft { user_id, timestamp },
            EventPayload::Chat { message } => ServerMessage::Chat {
                user_id,
                message: message.clone(),
                timestamp,
            },
            EventPayload::PresenceSnapshot { participants } => ServerMessage::RoomState {
                participants: participants.clone(),
                timestamp,
            },
            EventPayload::Error { message } => ServerMessage::error(message.clone()),
            EventPayload::TimerUpdate { timer_state } => ServerMessage::PomodoroUpdate {
                timer_state: timer_state.clone(),
                timestamp,
            },
            EventPayload::TaskUpdate { tasks } => ServerMessage::TaskUpdate {
                user_id,
                tasks: tasks.clone(),
                timestamp,
            },
        }
    }

    /// Serialize to a shareable JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Arc<str>, ProtocolError> {
        codec::encode_server(&self.to_server_message()).map(Arc::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = Event::chat("r1", "ada", "hello");
        assert_eq!(event.room_id, "r1");
        assert_eq!(event.origin.as_deref(), Some("ada"));
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_event_to_server_message() {
        let event = Event::left("r1", "bob");
        match event.to_server_message() {
            ServerMessage::UserLeft { user_id, timestamp } => {
                assert_eq!(user_id, "bob");
                assert_eq!(timestamp, event.timestamp);
            }
            other => panic!("Expected UserLeft, got {:?}", other),
        }

        let snapshot = Event::presence_snapshot("r1", vec!["ada".into(), "bob".into()]);
        assert!(matches!(
            snapshot.to_server_message(),
            ServerMessage::RoomState { participants, .. } if participants.len() == 2
        ));
    }

    #[test]
    fn test_event_encode() {
        let frame = Event::new(
            "r1",
            EventPayload::TimerUpdate {
                timer_state: json!({"remaining": 90}),
            },
        )
        .encode()
        .unwrap();

        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "pomodoro_update");
        assert_eq!(value["timerState"]["remaining"], 90);
    }
}
