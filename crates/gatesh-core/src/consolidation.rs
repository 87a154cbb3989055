//! Opening hysteresis.
//!
//! A gate opens only after `count` consecutive raw-true cycles, each at least
//! `delay` after the previously counted one. Any raw-false cycle closes the
//! gate and resets the count immediately. The tracker is a pure function of
//! the previous [`ConsolidationState`]; persisting that state is the caller's
//! job.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::status::GateState;

/// Hysteresis state carried from one cycle to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationState {
    /// Consecutive counted raw-true cycles.
    pub consecutive_valid_cycles: u32,
    /// When the last raw-true cycle was counted.
    pub last_counted_at: Option<DateTime<Utc>>,
    /// Debounced state.
    pub state: GateState,
}

/// Hysteresis parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consolidator {
    count: u32,
    delay: Duration,
}

impl Consolidator {
    /// Creates a tracker. A `count` of zero behaves like one.
    #[must_use]
    pub fn new(count: u32, delay: Duration) -> Self {
        Self {
            count: count.max(1),
            delay,
        }
    }

    /// Folds one raw verdict observed at `now` into `previous`.
    #[must_use]
    pub fn observe(
        &self,
        previous: ConsolidationState,
        raw: bool,
        now: DateTime<Utc>,
    ) -> ConsolidationState {
        if !raw {
            return ConsolidationState::default();
        }

        if previous
            .last_counted_at
            .is_some_and(|last| now.signed_duration_since(last) < self.delay_delta())
        {
            return previous;
        }

        let consecutive_valid_cycles = previous.consecutive_valid_cycles.saturating_add(1);
        let state = if previous.state.is_opened() || consecutive_valid_cycles >= self.count {
            GateState::Opened
        } else {
            GateState::Closed
        };
        ConsolidationState {
            consecutive_valid_cycles,
            last_counted_at: Some(now),
            state,
        }
    }

    fn delay_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.delay).unwrap_or(TimeDelta::MAX)
    }
}
