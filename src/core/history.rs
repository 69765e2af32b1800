//! Append-only log of machine transitions.

use super::value::StateValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// One move of the machine, stamped with the scheduler's clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state value being transitioned from
    pub from: StateValue,
    /// The state value being transitioned to
    pub to: StateValue,
    /// Type of the event that caused the transition
    pub event: String,
    /// When the transition occurred, per the machine's clock
    pub timestamp: DateTime<Utc>,
}

/// Transitions in the order they were taken.
///
/// A bounded history evicts its oldest transitions, so a machine that
/// loops for days keeps a fixed-size tail.
///
/// ```rust
/// use diachronic::core::{StateHistory, StateTransition, StateValue};
/// use chrono::{TimeZone, Utc};
///
/// let at = Utc.timestamp_millis_opt(0).unwrap();
/// let step = |from: &str, to: &str| StateTransition {
///     from: StateValue::from(from),
///     to: StateValue::from(to),
///     event: "hey".to_string(),
///     timestamp: at,
/// };
/// let empty = StateHistory::new();
/// let history = empty.record(step("initial", "heyed")).record(step("heyed", "initial"));
///
/// assert!(empty.transitions().is_empty());
/// let (initial, heyed) = (StateValue::from("initial"), StateValue::from("heyed"));
/// assert_eq!(history.get_path(), [&initial, &heyed, &initial]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateHistory {
    transitions: VecDeque<StateTransition>,
    /// Most recent transitions kept; `None` keeps everything
    #[serde(skip)]
    limit: Option<usize>,
}

impl StateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty history that keeps only the latest `limit` transitions.
    pub fn bounded(limit: usize) -> Self {
        Self {
            transitions: VecDeque::with_capacity(limit.min(1_024)),
            limit: Some(limit),
        }
    }

    /// Copy of this history with `transition` appended; `self` is untouched.
    pub fn record(&self, transition: StateTransition) -> Self {
        let mut next = self.clone();
        next.push(transition);
        next
    }

    /// Append in place, evicting the oldest entry once the limit is hit.
    pub fn push(&mut self, transition: StateTransition) {
        self.transitions.push_back(transition);
        self.trim();
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Change the retention limit, dropping the oldest entries beyond it.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
        self.trim();
    }

    /// Get the path of state values traversed.
    ///
    /// Returns references in order: the first `from` value, then the
    /// `to` value of each transition.
    pub fn get_path(&self) -> Vec<&StateValue> {
        let mut path = Vec::with_capacity(self.transitions.len() + 1);
        if let Some(first) = self.transitions.front() {
            path.push(&first.from);
        }
        path.extend(self.transitions.iter().map(|t| &t.to));
        path
    }

    /// Time between the first and the last retained transition.
    pub fn duration(&self) -> Option<Duration> {
        let first = self.transitions.front()?;
        let last = self.transitions.back()?;
        (last.timestamp - first.timestamp).to_std().ok()
    }

    pub fn transitions(&self) -> &VecDeque<StateTransition> {
        &self.transitions
    }

    fn trim(&mut self) {
        if let Some(limit) = self.limit {
            let excess = self.transitions.len().saturating_sub(limit);
            self.transitions.drain(..excess);
        }
    }
}
