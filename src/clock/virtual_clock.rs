//! Simulated time for deterministic tests.

use super::{Clock, TimerCallback, TimerHandle};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

struct Pending {
    handle: TimerHandle,
    callback: TimerCallback,
}

struct VirtualState {
    now: DateTime<Utc>,
    next_seq: u64,
    /// Keyed by (due time, registration order)
    timers: BTreeMap<(DateTime<Utc>, u64), Pending>,
}

/// Clock whose time only moves on [`VirtualClock::advance`].
///
/// Advancing fires every timer that falls due, in non-decreasing due-time
/// order with ties broken by registration order. Callbacks run outside
/// the internal lock, so they may arm or clear further timers; timers
/// they arm inside the advanced window fire in the same call.
///
/// # Example
///
/// ```rust
/// use diachronic::clock::{Clock, VirtualClock};
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// let clock = VirtualClock::default();
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// for (name, ms) in [("b", 20), ("a", 10)] {
///     let log = Arc::clone(&log);
///     let push = Box::new(move || log.lock().unwrap().push(name));
///     clock.set_timer(push, Duration::from_millis(ms));
/// }
///
/// clock.advance(Duration::from_millis(15));
/// assert_eq!(*log.lock().unwrap(), vec!["a"]);
/// clock.advance(Duration::from_millis(15));
/// assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
/// ```
#[derive(Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualClock {
    /// Create a clock reading `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                now: start,
                next_seq: 0,
                timers: BTreeMap::new(),
            })),
        }
    }

    /// Move time forward, firing every timer that falls due.
    pub fn advance(&self, duration: Duration) {
        let target = {
            let state = self.lock();
            add_duration(state.now, duration)
        };
        loop {
            let due = {
                let mut state = self.lock();
                let earliest = state.timers.keys().next().map(|&(at, _)| at);
                match earliest {
                    Some(at) if at <= target => {
                        state.now = state.now.max(at);
                        state.timers.pop_first().map(|(_, pending)| pending)
                    }
                    _ => {
                        state.now = state.now.max(target);
                        None
                    }
                }
            };
            match due {
                Some(pending) => (pending.callback)(),
                None => break,
            }
        }
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.lock().timers.len()
    }

    /// Due time of the earliest armed timer.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock().timers.keys().next().map(|&(at, _)| at)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VirtualClock {
    /// A clock starting at the Unix epoch.
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.set_timer(
            Box::new(move || {
                let _ = tx.send(());
            }),
            duration,
        );
        async move {
            let _ = rx.await;
        }
        .boxed()
    }

    fn set_timer(&self, callback: TimerCallback, delay: Duration) -> TimerHandle {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = add_duration(state.now, delay);
        let handle = TimerHandle(seq);
        state.timers.insert((due, seq), Pending { handle, callback });
        handle
    }

    fn clear_timer(&self, handle: TimerHandle) {
        let mut state = self.lock();
        let key = state
            .timers
            .iter()
            .find(|(_, pending)| pending.handle == handle)
            .map(|(key, _)| *key);
        if let Some(key) = key {
            state.timers.remove(&key);
        }
    }
}

fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
