//! # studyhall-core
//!
//! Realtime synchronization core for Study Hall rooms.
//!
//! This crate provides the building blocks shared by the server and by
//! timer clients:
//!
//! - **Registry** - Which live connection belongs to which participant in which room
//! - **Broadcaster** - Fan-out of one event to every connection in a room
//! - **Presence** - Join/leave transitions, presence snapshots and relays
//! - **Timer** - Client-predictive countdown reconciled against a shared record
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Presence   │────▶│ Broadcaster │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       ▲
//!        └───────────────────────────────────────┘
//!
//! ┌─────────────┐     ┌─────────────┐
//! │TimerSession │────▶│ TimerStore  │   (independent of the hub)
//! └─────────────┘     └─────────────┘
//! ```

pub mod broadcast;
pub mod event;
pub mod policy;
pub mod presence;
pub mod registry;
pub mod timer;

pub use broadcast::Broadcaster;
pub use event::{Event, EventPayload, ParticipantId, RoomId};
pub use policy::{AllowAll, AuthorizationError, JoinPolicy, JoinRequest};
pub use presence::{Membership, PresenceConfig, PresenceCoordinator, PresenceError};
pub use registry::{
    ConnectionClosed, ConnectionHandle, ConnectionId, Outbound, Registry, RegistryStats,
    RoomSnapshot,
};
pub use timer::{
    InMemoryTimerStore, StoreError, TimerCommand, TimerConfig, TimerError, TimerHandle,
    TimerMode, TimerPatch, TimerRecord, TimerSnapshot, TimerStore, TimerView,
};
