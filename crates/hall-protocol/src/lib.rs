//! # studyhall-protocol
//!
//! Wire protocol definitions for the Study Hall realtime hub.
//!
//! Every message is a JSON object carried in a WebSocket text frame and
//! distinguished by its `type` tag. Field names are camelCase on the wire.
//!
//! ## Message Types
//!
//! - `join` / `leave` - Room membership
//! - `chat` - Chat relayed to the other members of the room
//! - `pomodoro_update` / `task_update` - Shared timer and task relays
//! - `user_joined` / `user_left` / `room_state` - Presence
//! - `error` - Rejections and protocol errors
//!
//! ## Example
//!
//! ```rust
//! use studyhall_protocol::{codec, ClientMessage};
//!
//! let msg = codec::decode_client(r#"{"type":"join","userId":"ada","roomId":"r1"}"#).unwrap();
//! assert_eq!(msg, ClientMessage::join("ada", "r1"));
//! ```

pub mod codec;
pub mod messages;

pub use codec::{
    decode_client, decode_server, encode_client, encode_server, Codec, ProtocolError,
    MAX_MESSAGE_SIZE,
};
pub use messages::{ClientMessage, MessageKind, ServerMessage};
