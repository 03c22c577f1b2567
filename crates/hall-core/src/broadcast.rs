//! Room fan-out.
//!
//! The broadcaster depends only on [`Registry::snapshot`]. Failed sends are
//! dropped silently; the dead connection is cleaned up by its own close path.

use crate::event::Event;
use crate::registry::{ConnectionClosed, ConnectionHandle, Registry};
use std::sync::Arc;
use tracing::{trace, warn};

/// Fans events out to the members of a room.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Publish an event to its room, optionally skipping one participant.
    ///
    /// Members present in the snapshot taken at call time receive the event
    /// at most once. Returns the number of connections the frame was queued on.
    pub fn publish(&self, event: &Event, exclude: Option<&str>) -> usize {
        let snapshot = self.registry.snapshot(&event.room_id);
        if snapshot.is_empty() {
            trace!(room = %event.room_id, "Publish to empty room");
            return 0;
        }

        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room = %event.room_id, error = %e, "Failed to encode event");
                return 0;
            }
        };

        let mut delivered = 0;
        for (participant, handle) in snapshot.iter() {
            if exclude == Some(participant) {
                continue;
            }
            match handle.send_frame(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(e) => trace!(room = %event.room_id, participant = %participant, error = %e, "Dropped frame"),
            }
        }

        trace!(room = %event.room_id, recipients = delivered, "Published event");
        delivered
    }

    /// Send an event to a single connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone. Encoding failures are
    /// logged and reported as success, since there is nothing to deliver.
    pub fn send_to(&self, handle: &ConnectionHandle, event: &Event) -> Result<(), ConnectionClosed> {
        match event.encode() {
            Ok(frame) => handle.send_frame(frame),
            Err(e) => {
                warn!(room = %event.room_id, error = %e, "Failed to encode event");
                Ok(())
            }
        }
    }
}
