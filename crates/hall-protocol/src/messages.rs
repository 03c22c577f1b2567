//! Message types for the Study Hall protocol.
//!
//! Client and server messages are separate enums so that each side only
//! accepts what the other is allowed to send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message kind identifiers, as they appear in the `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    Leave,
    Chat,
    PomodoroUpdate,
    TaskUpdate,
    UserJoined,
    UserLeft,
    RoomState,
    Error,
}

impl MessageKind {
    /// Tags a client may send.
    pub const CLIENT: [MessageKind; 5] = [
        MessageKind::Join,
        MessageKind::Leave,
        MessageKind::Chat,
        MessageKind::PomodoroUpdate,
        MessageKind::TaskUpdate,
    ];

    /// Tags a server may send.
    pub const SERVER: [MessageKind; 7] = [
        MessageKind::UserJoined,
        MessageKind::UserLeft,
        MessageKind::RoomState,
        MessageKind::Chat,
        MessageKind::Error,
        MessageKind::PomodoroUpdate,
        MessageKind::TaskUpdate,
    ];

    /// The wire tag for this kind.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::Chat => "chat",
            MessageKind::PomodoroUpdate => "pomodoro_update",
            MessageKind::TaskUpdate => "task_update",
            MessageKind::UserJoined => "user_joined",
            MessageKind::UserLeft => "user_left",
            MessageKind::RoomState => "room_state",
            MessageKind::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A message sent from a client to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room as the given participant.
    #[serde(rename_all = "camelCase")]
    Join {
        /// Participant identity.
        user_id: String,
        /// Room to join.
        room_id: String,
        /// Credential handed to the join policy, if the room is gated.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// Leave the current room.
    Leave,

    /// Chat message for the current room.
    ///
    /// `userId` and `roomId` are accepted for compatibility; the hub always
    /// uses the identity bound by the connection's join.
    #[serde(rename_all = "camelCase")]
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        /// Message text.
        message: String,
    },

    /// Timer state pushed by one participant for everyone in the room.
    #[serde(rename_all = "camelCase")]
    PomodoroUpdate {
        /// Opaque timer state.
        timer_state: Value,
    },

    /// Task list pushed by one participant for everyone in the room.
    TaskUpdate {
        /// Opaque task list.
        tasks: Value,
    },
}

impl ClientMessage {
    /// Get the message kind.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::Join { .. } => MessageKind::Join,
            ClientMessage::Leave => MessageKind::Leave,
            ClientMessage::Chat { .. } => MessageKind::Chat,
            ClientMessage::PomodoroUpdate { .. } => MessageKind::PomodoroUpdate,
            ClientMessage::TaskUpdate { .. } => MessageKind::TaskUpdate,
        }
    }

    /// Create a new Join message.
    #[must_use]
    pub fn join(user_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        ClientMessage::Join {
            user_id: user_id.into(),
            room_id: room_id.into(),
            password: None,
        }
    }

    /// Create a new Join message carrying a room password.
    #[must_use]
    pub fn join_with_password(
        user_id: impl Into<String>,
        room_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        ClientMessage::Join {
            user_id: user_id.into(),
            room_id: room_id.into(),
            password: Some(password.into()),
        }
    }

    /// Create a new Chat message.
    #[must_use]
    pub fn chat(
        user_id: impl Into<String>,
        room_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ClientMessage::Chat {
            user_id: Some(user_id.into()),
            room_id: Some(room_id.into()),
            message: message.into(),
        }
    }
}

/// A message sent from the hub to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Another participant joined the room.
    #[serde(rename_all = "camelCase")]
    UserJoined { user_id: String, timestamp: u64 },

    /// A participant left the room.
    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: String, timestamp: u64 },

    /// Current members, sent only to the connection that just joined.
    RoomState {
        participants: Vec<String>,
        timestamp: u64,
    },

    /// Chat message from another participant.
    #[serde(rename_all = "camelCase")]
    Chat {
        user_id: String,
        message: String,
        timestamp: u64,
    },

    /// Request rejected or not understood.
    Error { message: String },

    /// Relayed timer state.
    #[serde(rename_all = "camelCase")]
    PomodoroUpdate { timer_state: Value, timestamp: u64 },

    /// Relayed task list.
    #[serde(rename_all = "camelCase")]
    TaskUpdate {
        user_id: String,
        tasks: Value,
        timestamp: u64,
    },
}

impl ServerMessage {
    /// Get the message kind.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::UserJoined { .. } => MessageKind::UserJoined,
            ServerMessage::UserLeft { .. } => MessageKind::UserLeft,
            ServerMessage::RoomState { .. } => MessageKind::RoomState,
            ServerMessage::Chat { .. } => MessageKind::Chat,
            ServerMessage::Error { .. } => MessageKind::Error,
            ServerMessage::PomodoroUpdate { .. } => MessageKind::PomodoroUpdate,
            ServerMessage::TaskUpdate { .. } => MessageKind::TaskUpdate,
        }
    }

    /// Create a new Error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_kind() {
        assert_eq!(ClientMessage::join("a", "r").kind(), MessageKind::Join);
        assert_eq!(ClientMessage::Leave.kind(), MessageKind::Leave);
        assert_eq!(ServerMessage::error("nope").kind(), MessageKind::Error);
        assert_eq!(MessageKind::PomodoroUpdate.tag(), "pomodoro_update");
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::UserJoined {
            user_id: "ada".into(),
            timestamp: 42,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "user_joined", "userId": "ada", "timestamp": 42})
        );

        let state = ServerMessage::RoomState {
            participants: vec!["ada".into(), "bob".into()],
            timestamp: 7,
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"type": "room_state", "participants": ["ada", "bob"], "timestamp": 7})
        );
    }

    #[test]
    fn test_client_message_wire_shape() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "pomodoro_update",
            "timerState": {"remaining": 1500}
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::PomodoroUpdate {
                timer_state: json!({"remaining": 1500})
            }
        );

        // Join without a password omits the field entirely.
        let value = serde_json::to_value(ClientMessage::join("ada", "r1")).unwrap();
        assert_eq!(value, json!({"type": "join", "userId": "ada", "roomId": "r1"}));

        let private: ClientMessage = serde_json::from_value(json!({
            "type": "join",
            "userId": "ada",
            "roomId": "r1",
            "password": "s3cret"
        }))
        .unwrap();
        assert_eq!(private, ClientMessage::join_with_password("ada", "r1", "s3cret"));
    }
}
