//! Client-side predictive countdown.
//!
//! [`TimerView`] is a plain state machine: every operation mutates the local
//! countdown and returns the store write it requires, if any. Scheduling and
//! store I/O belong to [`TimerSession`](super::TimerSession).

use super::record::{
    minutes_to_seconds, seconds_to_store_minutes, TimerMode, TimerPatch, TimerRecord,
};
use serde::Serialize;

/// Default number of ticks between batched write-backs.
pub const DEFAULT_WRITE_BACK_EVERY: u32 = 4;

/// Why a write was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Periodic push of the local countdown.
    WriteBack,
    /// Focus/break flip after reaching zero.
    Transition,
    Pause,
    Resume,
    Reset,
}

impl WriteKind {
    /// Whether a successful write of this kind moves the record's cycle.
    #[must_use]
    pub fn advances_cycle(self) -> bool {
        matches!(self, WriteKind::Transition | WriteKind::Reset)
    }
}

/// A store write produced by the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerWrite {
    pub kind: WriteKind,
    pub patch: TimerPatch,
}

/// Outcome of applying a reconciliation read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The record was paused; its remaining time replaced the local one.
    AdoptedPaused,
    /// The timer is counting down; the record's remaining time was ignored.
    Ignored,
}

/// Point-in-time copy of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub remaining_seconds: u32,
    pub mode: TimerMode,
    pub paused: bool,
    pub focus_minutes: u32,
    pub break_minutes: u32,
    pub cycle: u64,
}

impl TimerSnapshot {
    /// Remaining time as `MM:SS`.
    #[must_use]
    pub fn clock(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.remaining_seconds / 60,
            self.remaining_seconds % 60
        )
    }
}

/// Local countdown for one observer of a room timer.
#[derive(Debug, Clone)]
pub struct TimerView {
    remaining_seconds: u32,
    mode: TimerMode,
    paused: bool,
    focus_minutes: u32,
    break_minutes: u32,
    ticks_since_write: u32,
    write_back_every: u32,
    /// Last cycle this view knows it is in.
    cycle: u64,
}

impl TimerView {
    /// Initialize from the first full read.
    ///
    /// An exhausted countdown starts in break regardless of the stored mode.
    #[must_use]
    pub fn from_record(record: &TimerRecord) -> Self {
        let remaining_seconds = minutes_to_seconds(record.remaining_minutes);
        Self {
            remaining_seconds,
            mode: if remaining_seconds > 0 {
                record.mode
            } else {
                TimerMode::Break
            },
            paused: record.paused,
            focus_minutes: record.focus_minutes,
            break_minutes: record.break_minutes,
            ticks_since_write: 0,
            write_back_every: DEFAULT_WRITE_BACK_EVERY,
            cycle: record.cycle,
        }
    }

    /// Change the write-back batch size. Zero is treated as one.
    #[must_use]
    pub fn with_write_back_every(mut self, ticks: u32) -> Self {
        self.write_back_every = ticks.max(1);
        self
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    #[must_use]
    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    #[must_use]
    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            remaining_seconds: self.remaining_seconds,
            mode: self.mode,
            paused: self.paused,
            focus_minutes: self.focus_minutes,
            break_minutes: self.break_minutes,
            cycle: self.cycle,
        }
    }

    fn duration_for(&self, mode: TimerMode) -> u32 {
        match mode {
            TimerMode::Focus => self.focus_minutes,
            TimerMode::Break => self.break_minutes,
        }
    }

    /// Advance the countdown by one second.
    ///
    /// Returns a write every `write_back_every` ticks, or immediately when
    /// the countdown reaches zero and the mode flips.
    pub fn tick(&mut self) -> Option<TimerWrite> {
        if self.paused {
            return None;
        }
        if self.remaining_seconds == 0 {
            return Some(self.transition());
        }

        self.remaining_seconds -= 1;
        if self.remaining_seconds == 0 {
            return Some(self.transition());
        }

        self.ticks_since_write += 1;
        if self.ticks_since_write < self.write_back_every {
            return None;
        }
        self.ticks_since_write = 0;
        Some(TimerWrite {
            kind: WriteKind::WriteBack,
            patch: TimerPatch::new()
                .remaining_minutes(seconds_to_store_minutes(self.remaining_seconds))
                .paused(false),
        })
    }

    fn transition(&mut self) -> TimerWrite {
        self.mode = self.mode.next();
        let minutes = self.duration_for(self.mode);
        self.remaining_seconds = minutes_to_seconds(minutes);
        self.ticks_since_write = 0;
        TimerWrite {
            kind: WriteKind::Transition,
            patch: TimerPatch::new()
                .remaining_minutes(minutes)
                .paused(false)
                .mode(self.mode)
                .transition_from(self.cycle),
        }
    }

    fn pause_write(&self, kind: WriteKind) -> TimerWrite {
        TimerWrite {
            kind,
            patch: TimerPatch::new()
                .remaining_minutes(seconds_to_store_minutes(self.remaining_seconds))
                .paused(self.paused),
        }
    }

    /// Flip the paused flag.
    pub fn toggle_pause(&mut self) -> TimerWrite {
        self.paused = !self.paused;
        self.ticks_since_write = 0;
        let kind = if self.paused {
            WriteKind::Pause
        } else {
            WriteKind::Resume
        };
        self.pause_write(kind)
    }

    /// Pause. No-op if already paused.
    pub fn pause(&mut self) -> Option<TimerWrite> {
        if self.paused {
            None
        } else {
            Some(self.toggle_pause())
        }
    }

    /// Resume. No-op if already running.
    pub fn resume(&mut self) -> Option<TimerWrite> {
        if self.paused {
            Some(self.toggle_pause())
        } else {
            None
        }
    }

    /// Back to a paused, full focus period.
    pub fn reset(&mut self) -> TimerWrite {
        self.remaining_seconds = minutes_to_seconds(self.focus_minutes);
        self.mode = TimerMode::Focus;
        self.paused = true;
        self.ticks_since_write = 0;
        TimerWrite {
            kind: WriteKind::Reset,
            patch: TimerPatch::new()
                .remaining_minutes(self.focus_minutes)
                .paused(true)
                .mode(TimerMode::Focus)
                .advance_cycle(),
        }
    }

    /// Apply a periodic reconciliation read.
    ///
    /// Durations are always taken from the record. Remaining time and the
    /// paused flag are taken only when the record is paused; while the
    /// record is running the local countdown stays authoritative. The
    /// record's mode is taken when it is in a different cycle.
    pub fn apply_read(&mut self, record: &TimerRecord) -> ReadOutcome {
        self.focus_minutes = record.focus_minutes;
        self.break_minutes = record.break_minutes;

        if !record.paused {
            return ReadOutcome::Ignored;
        }
        self.adopt(record);
        self.paused = true;
        ReadOutcome::AdoptedPaused
    }

    /// Record the store's cycle after a transition or reset lands.
    pub fn observe_cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
    }

    /// Catch up with the record after a transition was rejected as stale.
    ///
    /// The locally flipped period is kept when the winning write landed in
    /// the same mode. Otherwise the record's period replaces it.
    pub fn observe_conflict(&mut self, current: &TimerRecord) {
        if current.mode == self.mode {
            self.cycle = current.cycle;
            return;
        }
        self.adopt(current);
        self.paused = current.paused;
    }

    fn adopt(&mut self, record: &TimerRecord) {
        if record.cycle != self.cycle {
            self.mode = record.mode;
        }
        self.remaining_seconds = minutes_to_seconds(record.remaining_minutes);
        self.ticks_since_write = 0;
        self.cycle = record.cycle;
    }
}
