//! Shared focus/break countdown.
//!
//! Each observer keeps a local, second-resolution [`TimerView`] that ticks on
//! its own and reconciles against one authoritative [`TimerRecord`] held by a
//! [`TimerStore`]:
//!
//! - every few ticks the local countdown is written back (minute granularity),
//! - on a fixed period the record is re-read, and its remaining time is only
//!   trusted while the record is paused,
//! - mode transitions carry the cycle they start from, so the store accepts
//!   exactly one of several competing transitions.
//!
//! [`TimerHandle::spawn`] runs a view against a store on a tokio task.

mod record;
mod session;
mod store;
mod view;

pub use record::{
    minutes_to_seconds, seconds_to_store_minutes, TimerMode, TimerPatch, TimerRecord,
};
pub use session::{TimerCommand, TimerConfig, TimerError, TimerHandle};
pub use store::{InMemoryTimerStore, StoreError, TimerStore};
pub use view::{ReadOutcome, TimerSnapshot, TimerView, TimerWrite, WriteKind};
