//! Timer store interface.
//!
//! The authoritative [`TimerRecord`] lives outside the hub. Every write is
//! last-write-wins, except writes carrying an expected cycle, which the
//! store rejects once another transition has landed.

use super::record::{TimerPatch, TimerRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No timer for this room.
    #[error("Timer not found: {0}")]
    NotFound(String),

    /// A transition already moved the record past the expected cycle.
    #[error("Stale timer write: expected cycle {expected}")]
    Conflict {
        expected: u64,
        current: TimerRecord,
    },

    /// The store could not be reached.
    #[error("Timer store unavailable: {0}")]
    Unavailable(String),
}

/// Read/write access to authoritative timer records.
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Read a room's timer.
    async fn read_timer(&self, room_id: &str) -> Result<TimerRecord, StoreError>;

    /// Apply a partial update and return the updated record.
    async fn update_timer(&self, room_id: &str, patch: TimerPatch)
        -> Result<TimerRecord, StoreError>;
}

#[async_trait]
impl<S: TimerStore + ?Sized> TimerStore for Arc<S> {
    async fn read_timer(&self, room_id: &str) -> Result<TimerRecord, StoreError> {
        (**self).read_timer(room_id).await
    }

    async fn update_timer(
        &self,
        room_id: &str,
        patch: TimerPatch,
    ) -> Result<TimerRecord, StoreError> {
        (**self).update_timer(room_id, patch).await
    }
}

/// In-process timer store.
#[derive(Debug, Default)]
pub struct InMemoryTimerStore {
    timers: DashMap<String, TimerRecord>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryTimerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a room's timer.
    pub fn insert(&self, room_id: impl Into<String>, record: TimerRecord) {
        self.timers.insert(room_id.into(), record);
    }

    /// Remove a room's timer.
    pub fn remove(&self, room_id: &str) -> Option<TimerRecord> {
        self.timers.remove(room_id).map(|(_, r)| r)
    }

    /// Current record, without counting as a read.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<TimerRecord> {
        self.timers.get(room_id).map(|r| r.clone())
    }

    /// Number of reads served.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of writes accepted.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TimerStore for InMemoryTimerStore {
    async fn read_timer(&self, room_id: &str) -> Result<TimerRecord, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.get(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))
    }

    async fn update_timer(
        &self,
        room_id: &str,
        patch: TimerPatch,
    ) -> Result<TimerRecord, StoreError> {
        let mut record = self
            .timers
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))?;

        if let Some(expected) = patch.expected_cycle {
            if expected != record.cycle {
                debug!(room = %room_id, expected = expected, cycle = record.cycle, "Rejected stale transition");
                return Err(StoreError::Conflict {
                    expected,
                    current: record.clone(),
                });
            }
        }

        record.apply(&patch);
        self.writes.fetch_add(1, Ordering::Relaxed);
        trace!(room = %room_id, remaining = record.remaining_minutes, paused = record.paused, "Timer updated");

        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_and_update() {
        let store = InMemoryTimerStore::new();
        store.insert("r1", TimerRecord::new("t1", 25, 5));

        let updated = store
            .update_timer("r1", TimerPatch::new().remaining_minutes(12).paused(false))
            .await
            .unwrap();
        assert_eq!(updated.remaining_minutes, 12);
        assert!(!updated.paused);
        assert_eq!(store.read_timer("r1").await.unwrap(), updated);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_not_found() {
        let store = InMemoryTimerStore::new();
        assert!(matches!(
            store.read_timer("ghost").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update_timer("ghost", TimerPatch::new().paused(true)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_competing_transitions_apply_once() {
        let store = InMemoryTimerStore::new();
        store.insert("r1", TimerRecord::new("t1", 25, 5).with_remaining(0));

        let transition = TimerPatch::new()
            .remaining_minutes(5)
            .paused(false)
            .transition_from(0);

        let first = store.update_timer("r1", transition.clone()).await.unwrap();
        assert_eq!(first.cycle, 1);

        match store.update_timer("r1", transition).await {
            Err(StoreError::Conflict { expected, current }) => {
                assert_eq!(expected, 0);
                assert_eq!(current.cycle, 1);
            }
            other => panic!("Expected Conflict, got {:?}", other),
        }
        assert_eq!(store.get("r1").unwrap().cycle, 1);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_unconditional_writes_are_last_write_wins() {
        let store = InMemoryTimerStore::new();
        store.insert("r1", TimerRecord::new("t1", 25, 5).with_paused(false));

        store
            .update_timer("r1", TimerPatch::new().remaining_minutes(20))
            .await
            .unwrap();
        store
            .update_timer("r1", TimerPatch::new().remaining_minutes(22))
            .await
            .unwrap();
        assert_eq!(store.get("r1").unwrap().remaining_minutes, 22);
    }
}
