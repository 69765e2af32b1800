//! Durable timer records.

use crate::core::Event;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One pending delayed transition.
///
/// `start + delay` is the instant the transition is due. Entries cross the
/// process boundary inside continuation payloads, with `start` as epoch
/// milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerDataEntry {
    /// Timer id, equal to the delay id `after(<delay>)#<stateId>`
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    /// Delay in milliseconds, counted from `start`
    pub delay: u64,
    pub delay_function_name: String,
    pub state_id: String,
    /// Event that entered the owning state
    pub event: Event,
}

/// Every pending timer, keyed by timer id.
pub type TimerData = BTreeMap<String, TimerDataEntry>;

impl TimerDataEntry {
    /// Instant the timer is due.
    pub fn fire_at(&self) -> DateTime<Utc> {
        add_millis(self.start, self.delay)
    }

    /// Time remaining until the timer is due, zero once overdue.
    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        (self.fire_at() - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// `at + ms`, saturating at the representable maximum.
pub(crate) fn add_millis(at: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
