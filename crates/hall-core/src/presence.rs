//! Presence coordination.
//!
//! Turns registry mutations into `user_joined` / `user_left` events and
//! presence snapshots, and relays room traffic on behalf of members.
//!
//! A successful [`PresenceCoordinator::join`] yields a [`Membership`].
//! Dropping it leaves the room, so a connection task that ends for any
//! reason (close frame, transport error, cancellation) always cleans up.

use crate::broadcast::Broadcaster;
use crate::event::{Event, EventPayload, ParticipantId, RoomId};
use crate::policy::{AuthorizationError, JoinPolicy, JoinRequest};
use crate::registry::{ConnectionHandle, ConnectionId, Registry};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Presence errors.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Participant or room ID is empty.
    #[error("User ID and room ID are required")]
    MissingIdentity,

    /// Rejected by the join policy.
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    /// Joining would create a room beyond the configured limit.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,
}

/// Presence configuration.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Maximum number of live rooms.
    pub max_rooms: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { max_rooms: 10_000 }
    }
}

/// Coordinates joins, leaves and relays for all rooms.
pub struct PresenceCoordinator {
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    policy: Arc<dyn JoinPolicy>,
    config: PresenceConfig,
}

impl PresenceCoordinator {
    /// Create a coordinator over an existing registry and broadcaster.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        broadcaster: Broadcaster,
        policy: Arc<dyn JoinPolicy>,
        config: PresenceConfig,
    ) -> Self {
        info!("Creating presence coordinator with config: {:?}", config);
        Self {
            registry,
            broadcaster,
            policy,
            config,
        }
    }

    /// Get the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Join a room.
    ///
    /// Registers the connection, tells existing members, then sends the
    /// member list to the joining connection only. If the participant was
    /// already registered on another connection, that connection is asked
    /// to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is incomplete, the policy rejects
    /// it, or the room limit is reached. Nothing is registered in that case.
    pub async fn join(
        self: &Arc<Self>,
        request: JoinRequest,
        handle: ConnectionHandle,
    ) -> Result<Membership, PresenceError> {
        if request.participant_id.is_empty() || request.room_id.is_empty() {
            return Err(PresenceError::MissingIdentity);
        }

        self.policy.authorize(&request).await?;

        if !self.registry.room_exists(&request.room_id)
            && self.registry.room_count() >= self.config.max_rooms
        {
            return Err(PresenceError::MaxRoomsReached);
        }

        let JoinRequest {
            participant_id,
            room_id,
            ..
        } = request;
        let connection_id = handle.id();

        if let Some(previous) = self
            .registry
            .register(&participant_id, &room_id, handle.clone())
        {
            if previous.id() != connection_id {
                debug!(
                    room = %room_id,
                    participant = %participant_id,
                    superseded = %previous.id(),
                    connection = %connection_id,
                    "Closing superseded connection"
                );
                previous.close();
            }
        }

        self.broadcaster
            .publish(&Event::joined(&room_id, &participant_id), Some(participant_id.as_str()));

        let snapshot = self.registry.snapshot(&room_id);
        let state = Event::presence_snapshot(&room_id, snapshot.participants());
        if let Err(e) = self.broadcaster.send_to(&handle, &state) {
            trace!(room = %room_id, error = %e, "Joining connection gone before room state");
        }

        debug!(room = %room_id, participant = %participant_id, members = snapshot.len(), "Joined");

        Ok(Membership {
            coordinator: Arc::clone(self),
            participant_id,
            room_id,
            connection_id,
            active: true,
        })
    }

    /// Leave a room on behalf of a specific connection.
    ///
    /// Returns `true` if the connection was still the participant's
    /// registered one. Remaining members are told; an emptied room is gone.
    pub fn leave(&self, participant: &str, room: &str, connection: ConnectionId) -> bool {
        if self
            .registry
            .unregister_connection(participant, room, connection)
            .is_none()
        {
            trace!(room = %room, participant = %participant, connection = %connection, "Leave for stale membership");
            return false;
        }

        let notified = self.broadcaster.publish(&Event::left(room, participant), None);
        debug!(room = %room, participant = %participant, notified = notified, "Left");
        true
    }

    /// Relay a chat message to everyone in the member's room but the sender.
    pub fn relay_chat(&self, membership: &Membership, message: impl Into<String>) -> usize {
        let event = Event::chat(&membership.room_id, &membership.participant_id, message);
        self.broadcaster
            .publish(&event, Some(membership.participant_id.as_str()))
    }

    /// Relay timer state to everyone in the member's room, sender included.
    pub fn relay_timer_update(&self, membership: &Membership, timer_state: Value) -> usize {
        let event = Event::new(&membership.room_id, EventPayload::TimerUpdate { timer_state })
            .with_origin(&membership.participant_id);
        self.broadcaster.publish(&event, None)
    }

    /// Relay a task list to everyone in the member's room, sender included.
    pub fn relay_task_update(&self, membership: &Membership, tasks: Value) -> usize {
        let event = Event::new(&membership.room_id, EventPayload::TaskUpdate { tasks })
            .with_origin(&membership.participant_id);
        self.broadcaster.publish(&event, None)
    }
}

/// Proof of a live room membership.
///
/// Dropping it leaves the room.
pub struct Membership {
    coordinator: Arc<PresenceCoordinator>,
    participant_id: ParticipantId,
    room_id: RoomId,
    connection_id: ConnectionId,
    active: bool,
}

impl Membership {
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Leave explicitly.
    ///
    /// Returns `false` if this membership had already been superseded.
    pub fn leave(mut self) -> bool {
        self.active = false;
        self.coordinator
            .leave(&self.participant_id, &self.room_id, self.connection_id)
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("participant_id", &self.participant_id)
            .field("room_id", &self.room_id)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.active {
            self.coordinator
                .leave(&self.participant_id, &self.room_id, self.connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AllowAll;
    use crate::registry::Outbound;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct RoomPassword(&'static str);

    #[async_trait]
    impl JoinPolicy for RoomPassword {
        async fn authorize(&self, request: &JoinRequest) -> Result<(), AuthorizationError> {
            match request.password.as_deref() {
                Some(p) if p == self.0 => Ok(()),
                _ => Err(AuthorizationError::InvalidCredentials),
            }
        }
    }

    struct Banned(&'static str);

    #[async_trait]
    impl JoinPolicy for Banned {
        async fn authorize(&self, request: &JoinRequest) -> Result<(), AuthorizationError> {
            if request.participant_id == self.0 {
                Err(AuthorizationError::Denied(format!("{} is banned", self.0)))
            } else {
                Ok(())
            }
        }
    }

    fn coordinator_with(policy: Arc<dyn JoinPolicy>, max_rooms: usize) -> Arc<PresenceCoordinator> {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        Arc::new(PresenceCoordinator::new(
            registry,
            broadcaster,
            policy,
            PresenceConfig { max_rooms },
        ))
    }

    fn coordinator() -> Arc<PresenceCoordinator> {
        coordinator_with(Arc::new(AllowAll), 100)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Frame(text) = item {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_join_notifies_and_snapshots() {
        let hub = coordinator();
        let (ada, mut ada_rx) = ConnectionHandle::channel();
        let (bob, mut bob_rx) = ConnectionHandle::channel();

        let _ada = hub.join(JoinRequest::new("ada", "r1"), ada).await.unwrap();
        let ada_msgs = drain(&mut ada_rx);
        assert_eq!(ada_msgs.len(), 1);
        assert_eq!(ada_msgs[0]["type"], "room_state");
        assert_eq!(ada_msgs[0]["participants"], json!(["ada"]));

        let _bob = hub.join(JoinRequest::new("bob", "r1"), bob).await.unwrap();

        let ada_msgs = drain(&mut ada_rx);
        assert_eq!(ada_msgs.len(), 1);
        assert_eq!(ada_msgs[0]["type"], "user_joined");
        assert_eq!(ada_msgs[0]["userId"], "bob");

        // The joiner gets the room state, never its own user_joined.
        let bob_msgs = drain(&mut bob_rx);
        assert_eq!(bob_msgs.len(), 1);
        assert_eq!(bob_msgs[0]["type"], "room_state");
        assert_eq!(bob_msgs[0]["participants"], json!(["ada", "bob"]));
    }

    #[tokio::test]
    async fn test_chat_scenario() {
        let hub = coordinator();
        let (ada, mut ada_rx) = ConnectionHandle::channel();
        let (bob, mut bob_rx) = ConnectionHandle::channel();

        let ada_m = hub.join(JoinRequest::new("A", "r1"), ada).await.unwrap();
        let bob_m = hub.join(JoinRequest::new("B", "r1"), bob).await.unwrap();
        drain(&mut ada_rx);
        drain(&mut bob_rx);

        assert_eq!(hub.relay_chat(&ada_m, "hello"), 1);
        let bob_msgs = drain(&mut bob_rx);
        assert_eq!(bob_msgs.len(), 1);
        assert_eq!(bob_msgs[0]["type"], "chat");
        assert_eq!(bob_msgs[0]["userId"], "A");
        assert_eq!(bob_msgs[0]["message"], "hello");
        assert!(drain(&mut ada_rx).is_empty());

        // B disconnects: dropping the membership is the cleanup path.
        drop(bob_m);
        let ada_msgs = drain(&mut ada_rx);
        assert_eq!(ada_msgs.len(), 1);
        assert_eq!(ada_msgs[0]["type"], "user_left");
        assert_eq!(ada_msgs[0]["userId"], "B");
    }

    #[tokio::test]
    async fn test_last_leave_removes_room() {
        let hub = coordinator();
        let (ada, _rx) = ConnectionHandle::channel();

        let membership = hub.join(JoinRequest::new("ada", "r1"), ada).await.unwrap();
        assert!(hub.registry().room_exists("r1"));

        assert!(membership.leave());
        assert!(!hub.registry().room_exists("r1"));
        assert!(hub.registry().snapshot("r1").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_join_registers_nothing() {
        let hub = coordinator_with(Arc::new(RoomPassword("s3cret")), 100);
        let (ada, _rx) = ConnectionHandle::channel();

        let err = hub
            .join(JoinRequest::new("ada", "r1").with_password("guess"), ada.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PresenceError::Unauthorized(AuthorizationError::InvalidCredentials)
        ));
        assert!(!hub.registry().room_exists("r1"));

        let ok = hub
            .join(JoinRequest::new("ada", "r1").with_password("s3cret"), ada)
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_denied_join_reports_reason() {
        let hub = coordinator_with(Arc::new(Banned("mallory")), 100);
        let (ada, mut ada_rx) = ConnectionHandle::channel();
        let (mallory, _rx) = ConnectionHandle::channel();

        let _ada = hub.join(JoinRequest::new("ada", "r1"), ada).await.unwrap();
        drain(&mut ada_rx);

        let err = hub
            .join(JoinRequest::new("mallory", "r1"), mallory)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Join denied: mallory is banned");
        assert_eq!(hub.registry().member_count("r1"), 1);
        assert!(drain(&mut ada_rx).is_empty());
    }

    #[tokio::test]
    async fn test_join_validation_and_limits() {
        let hub = coordinator_with(Arc::new(AllowAll), 1);
        let (ada, _rx1) = ConnectionHandle::channel();
        let (bob, _rx2) = ConnectionHandle::channel();
        let (cy, _rx3) = ConnectionHandle::channel();

        assert!(matches!(
            hub.join(JoinRequest::new("", "r1"), ada.clone()).await,
            Err(PresenceError::MissingIdentity)
        ));

        let _ada = hub.join(JoinRequest::new("ada", "r1"), ada).await.unwrap();
        // Existing rooms stay joinable at the limit.
        let _bob = hub.join(JoinRequest::new("bob", "r1"), bob).await.unwrap();
        assert!(matches!(
            hub.join(JoinRequest::new("cy", "r2"), cy).await,
            Err(PresenceError::MaxRoomsReached)
        ));
    }

    #[tokio::test]
    async fn test_supersede_closes_old_connection() {
        let hub = coordinator();
        let (first, mut first_rx) = ConnectionHandle::channel();
        let (second, mut second_rx) = ConnectionHandle::channel();
        let (watcher, mut watcher_rx) = ConnectionHandle::channel();

        let _w = hub.join(JoinRequest::new("w", "r1"), watcher).await.unwrap();
        let old = hub.join(JoinRequest::new("ada", "r1"), first).await.unwrap();
        let _new = hub.join(JoinRequest::new("ada", "r1"), second).await.unwrap();

        let mut saw_close = false;
        while let Ok(item) = first_rx.try_recv() {
            saw_close |= item == Outbound::Close;
        }
        assert!(saw_close);

        drain(&mut watcher_rx);
        drain(&mut second_rx);

        // The old connection's cleanup must not evict the new one.
        drop(old);
        assert!(hub.registry().snapshot("r1").contains("ada"));
        assert!(drain(&mut watcher_rx).is_empty());
        assert_eq!(hub.registry().member_count("r1"), 2);
    }

    #[tokio::test]
    async fn test_relays_include_sender() {
        let hub = coordinator();
        let (ada, mut ada_rx) = ConnectionHandle::channel();
        let (bob, mut bob_rx) = ConnectionHandle::channel();

        let ada_m = hub.join(JoinRequest::new("ada", "r1"), ada).await.unwrap();
        let _bob_m = hub.join(JoinRequest::new("bob", "r1"), bob).await.unwrap();
        drain(&mut ada_rx);
        drain(&mut bob_rx);

        assert_eq!(hub.relay_timer_update(&ada_m, json!({"isPaused": true})), 2);
        assert_eq!(hub.relay_task_update(&ada_m, json!(["read ch. 3"])), 2);

        let ada_msgs = drain(&mut ada_rx);
        assert_eq!(ada_msgs[0]["type"], "pomodoro_update");
        assert_eq!(ada_msgs[1]["type"], "task_update");
        assert_eq!(ada_msgs[1]["userId"], "ada");
        assert_eq!(drain(&mut bob_rx).len(), 2);
    }
}
