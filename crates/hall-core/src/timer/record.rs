//! The authoritative timer record and its partial updates.
//!
//! The store keeps whole minutes; live countdowns run in whole seconds.
//! [`seconds_to_store_minutes`] rounds up, so a write followed by a read can
//! add up to 59 seconds to what a client last displayed.

use serde::{Deserialize, Serialize};

/// Seconds per stored minute.
pub const SECONDS_PER_MINUTE: u32 = 60;

/// Convert a live countdown to the store's minute granularity (ceiling).
#[must_use]
pub fn seconds_to_store_minutes(seconds: u32) -> u32 {
    seconds.div_ceil(SECONDS_PER_MINUTE)
}

/// Convert stored minutes to seconds.
#[must_use]
pub fn minutes_to_seconds(minutes: u32) -> u32 {
    minutes.saturating_mul(SECONDS_PER_MINUTE)
}

/// Which half of the cycle a timer is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    #[default]
    Focus,
    Break,
}

impl TimerMode {
    /// The mode that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            TimerMode::Focus => TimerMode::Break,
            TimerMode::Break => TimerMode::Focus,
        }
    }
}

impl std::fmt::Display for TimerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerMode::Focus => f.write_str("focus"),
            TimerMode::Break => f.write_str("break"),
        }
    }
}

/// A room's shared timer as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    pub id: String,
    pub focus_minutes: u32,
    pub break_minutes: u32,
    /// Always within `0..=max(focus_minutes, break_minutes)`.
    pub remaining_minutes: u32,
    pub paused: bool,
    /// Period the remaining time belongs to, as set by the last transition
    /// or reset.
    #[serde(default)]
    pub mode: TimerMode,
    /// Number of mode transitions (and resets) applied so far.
    #[serde(default)]
    pub cycle: u64,
}

impl TimerRecord {
    /// Create a paused timer at the start of a focus period.
    #[must_use]
    pub fn new(id: impl Into<String>, focus_minutes: u32, break_minutes: u32) -> Self {
        Self {
            id: id.into(),
            focus_minutes,
            break_minutes,
            remaining_minutes: focus_minutes,
            paused: true,
            mode: TimerMode::Focus,
            cycle: 0,
        }
    }

    /// Builder-style override of the remaining minutes.
    #[must_use]
    pub fn with_remaining(mut self, remaining_minutes: u32) -> Self {
        self.remaining_minutes = remaining_minutes.min(self.max_minutes());
        self
    }

    /// Builder-style override of the paused flag.
    #[must_use]
    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Largest value `remaining_minutes` may take.
    #[must_use]
    pub fn max_minutes(&self) -> u32 {
        self.focus_minutes.max(self.break_minutes)
    }

    /// Length of a period in minutes.
    #[must_use]
    pub fn duration_for(&self, mode: TimerMode) -> u32 {
        match mode {
            TimerMode::Focus => self.focus_minutes,
            TimerMode::Break => self.break_minutes,
        }
    }

    /// Apply a partial update, keeping the remaining-time invariant.
    ///
    /// The cycle check is the store's job; this only advances the counter.
    pub fn apply(&mut self, patch: &TimerPatch) {
        if let Some(focus) = patch.focus_minutes {
            self.focus_minutes = focus;
        }
        if let Some(brk) = patch.break_minutes {
            self.break_minutes = brk;
        }
        if let Some(remaining) = patch.remaining_minutes {
            self.remaining_minutes = remaining;
        }
        if let Some(paused) = patch.paused {
            self.paused = paused;
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        self.remaining_minutes = self.remaining_minutes.min(self.max_minutes());
        if patch.advance_cycle {
            self.cycle += 1;
        }
    }
}

/// A partial update to a [`TimerRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TimerMode>,
    /// Reject the write unless the record is still at this cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_cycle: Option<u64>,
    /// Count this write as a transition.
    #[serde(default)]
    pub advance_cycle: bool,
}

impl TimerPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn focus_minutes(mut self, minutes: u32) -> Self {
        self.focus_minutes = Some(minutes);
        self
    }

    #[must_use]
    pub fn break_minutes(mut self, minutes: u32) -> Self {
        self.break_minutes = Some(minutes);
        self
    }

    #[must_use]
    pub fn remaining_minutes(mut self, minutes: u32) -> Self {
        self.remaining_minutes = Some(minutes);
        self
    }

    #[must_use]
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: TimerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Make this write a transition out of `cycle`.
    #[must_use]
    pub fn transition_from(mut self, cycle: u64) -> Self {
        self.expected_cycle = Some(cycle);
        self.advance_cycle = true;
        self
    }

    /// Make this write an unconditional transition.
    #[must_use]
    pub fn advance_cycle(mut self) -> Self {
        self.advance_cycle = true;
        self
    }
}
