//! Join authorization seam.
//!
//! The hub asks a [`JoinPolicy`] for a pass/fail decision before registering
//! a connection. The policy itself (room passwords, bans, ...) lives outside
//! this crate.

use crate::event::{ParticipantId, RoomId};
use async_trait::async_trait;
use thiserror::Error;

/// A request to join a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub participant_id: ParticipantId,
    pub room_id: RoomId,
    /// Credential supplied by the client, if any.
    pub password: Option<String>,
}

impl JoinRequest {
    #[must_use]
    pub fn new(participant_id: impl Into<ParticipantId>, room_id: impl Into<RoomId>) -> Self {
        Self {
            participant_id: participant_id.into(),
            room_id: room_id.into(),
            password: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Join rejected by the policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    /// Missing or wrong room credential.
    #[error("Invalid room credentials")]
    InvalidCredentials,

    /// Rejected for another reason.
    #[error("Join denied: {0}")]
    Denied(String),
}

/// Decides whether a participant may join a room.
#[async_trait]
pub trait JoinPolicy: Send + Sync {
    /// Authorize a join request.
    async fn authorize(&self, request: &JoinRequest) -> Result<(), AuthorizationError>;
}

/// Policy that admits everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl JoinPolicy for AllowAll {
    async fn authorize(&self, _request: &JoinRequest) -> Result<(), AuthorizationError> {
        Ok(())
    }
}
