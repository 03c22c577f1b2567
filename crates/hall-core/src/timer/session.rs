//! Async driver for a [`TimerView`].
//!
//! One task per observer owns the view and runs the tick interval, the
//! reconciliation poll and incoming commands in a single `select!` loop.

use super::record::TimerRecord;
use super::store::{StoreError, TimerStore};
use super::view::{ReadOutcome, TimerSnapshot, TimerView, TimerWrite, DEFAULT_WRITE_BACK_EVERY};
use crate::event::RoomId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

const COMMAND_BUFFER: usize = 32;

/// Timer session errors.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The room's timer no longer exists.
    #[error("Timer not found: {0}")]
    NotFound(String),

    /// The store failed on the initial read.
    #[error(transparent)]
    Store(StoreError),

    /// The session loop is no longer running.
    #[error("Timer session stopped")]
    Stopped,
}

impl From<StoreError> for TimerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => TimerError::NotFound(id),
            other => TimerError::Store(other),
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Local countdown resolution.
    pub tick_interval: Duration,
    /// Ticks between batched write-backs.
    pub write_back_every: u32,
    /// Reconciliation read period.
    pub poll_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            write_back_every: DEFAULT_WRITE_BACK_EVERY,
            poll_interval: Duration::from_secs(3),
        }
    }
}

/// User actions on a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Toggle,
    Pause,
    Resume,
    Reset,
}

struct TimerSession {
    room_id: RoomId,
    store: Arc<dyn TimerStore>,
    view: TimerView,
    config: TimerConfig,
    commands: mpsc::Receiver<TimerCommand>,
    snapshots: watch::Sender<TimerSnapshot>,
}

impl TimerSession {
    async fn run(mut self) -> Result<(), TimerError> {
        let start = Instant::now();
        let mut tick = interval_at(start + self.config.tick_interval, self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = interval_at(start + self.config.poll_interval, self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(room = %self.room_id, paused = self.view.is_paused(), "Timer session started");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!(room = %self.room_id, "Timer session closed");
                        return Ok(());
                    };
                    self.handle_command(command, &mut tick).await?;
                }

                _ = tick.tick() => {
                    if let Some(write) = self.view.tick() {
                        self.write(write).await?;
                    }
                    self.publish();
                }

                _ = poll.tick() => {
                    self.reconcile().await?;
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: TimerCommand,
        tick: &mut Interval,
    ) -> Result<(), TimerError> {
        trace!(room = %self.room_id, command = ?command, "Timer command");
        let was_paused = self.view.is_paused();
        let write = match command {
            TimerCommand::Toggle => Some(self.view.toggle_pause()),
            TimerCommand::Pause => self.view.pause(),
            TimerCommand::Resume => self.view.resume(),
            TimerCommand::Reset => Some(self.view.reset()),
        };

        // A resumed countdown gets a full second before its first tick.
        if was_paused && !self.view.is_paused() {
            tick.reset();
        }
        if let Some(write) = write {
            self.write(write).await?;
        }
        self.publish();
        Ok(())
    }

    async fn write(&mut self, write: TimerWrite) -> Result<(), TimerError> {
        match self.store.update_timer(&self.room_id, write.patch).await {
            Ok(record) => {
                if write.kind.advances_cycle() {
                    self.view.observe_cycle(record.cycle);
                }
                trace!(room = %self.room_id, kind = ?write.kind, remaining = record.remaining_minutes, "Timer write applied");
                Ok(())
            }
            Err(StoreError::Conflict { expected, current }) => {
                debug!(
                    room = %self.room_id,
                    expected = expected,
                    cycle = current.cycle,
                    "Transition already applied by another client"
                );
                self.view.observe_conflict(&current);
                self.publish();
                Ok(())
            }
            Err(StoreError::NotFound(id)) => Err(TimerError::NotFound(id)),
            Err(e) => {
                warn!(room = %self.room_id, kind = ?write.kind, error = %e, "Timer write failed");
                Ok(())
            }
        }
    }

    async fn reconcile(&mut self) -> Result<(), TimerError> {
        match self.store.read_timer(&self.room_id).await {
            Ok(record) => {
                if self.view.apply_read(&record) == ReadOutcome::AdoptedPaused {
                    trace!(room = %self.room_id, remaining = record.remaining_minutes, "Adopted paused timer");
                }
                self.publish();
                Ok(())
            }
            Err(StoreError::NotFound(id)) => Err(TimerError::NotFound(id)),
            Err(e) => {
                warn!(room = %self.room_id, error = %e, "Timer poll failed");
                Ok(())
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.view.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// Owner of a running timer session.
///
/// Dropping the handle stops the session.
#[derive(Debug)]
pub struct TimerHandle {
    room_id: RoomId,
    commands: mpsc::Sender<TimerCommand>,
    snapshots: watch::Receiver<TimerSnapshot>,
    task: Option<JoinHandle<Result<(), TimerError>>>,
}

impl TimerHandle {
    /// Read the room's timer and start ticking.
    ///
    /// # Errors
    ///
    /// Fails if the initial read fails; `TimerError::NotFound` when the room
    /// has no timer.
    pub async fn spawn(
        room_id: impl Into<RoomId>,
        store: Arc<dyn TimerStore>,
        config: TimerConfig,
    ) -> Result<Self, TimerError> {
        let room_id = room_id.into();
        let record: TimerRecord = store.read_timer(&room_id).await?;
        let view = TimerView::from_record(&record).with_write_back_every(config.write_back_every);

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshots_tx, snapshots_rx) = watch::channel(view.snapshot());

        let session = TimerSession {
            room_id: room_id.clone(),
            store,
            view,
            config,
            commands: commands_rx,
            snapshots: snapshots_tx,
        };
        let task = tokio::spawn(session.run());

        Ok(Self {
            room_id,
            commands: commands_tx,
            snapshots: snapshots_rx,
            task: Some(task),
        })
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Queue a command.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::Stopped` if the session has ended.
    pub async fn send(&self, command: TimerCommand) -> Result<(), TimerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TimerError::Stopped)
    }

    /// Pause if running, resume if paused.
    pub async fn toggle(&self) -> Result<(), TimerError> {
        self.send(TimerCommand::Toggle).await
    }

    pub async fn reset(&self) -> Result<(), TimerError> {
        self.send(TimerCommand::Reset).await
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> TimerSnapshot {
        *self.snapshots.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.clone()
    }

    /// Whether the session loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the session and report how it ended.
    ///
    /// # Errors
    ///
    /// Returns the error the loop halted with, if it halted on its own.
    pub async fn shutdown(mut self) -> Result<(), TimerError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.abort();
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                warn!(room = %self.room_id, error = %e, "Timer session panicked");
                Err(TimerError::Stopped)
            }
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
