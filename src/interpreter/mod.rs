//! Timer-tracking interpreter.
//!
//! Wraps the chart [`Executor`] with a [`TimerTracker`] scheduler so the
//! set of pending delayed transitions is always available as plain data,
//! ready to be carried into a continuation and re-armed by a later
//! incarnation.

mod scheduler;
mod timer;

pub use crate::chart::DelayId;
pub use scheduler::{ClockScheduler, TimerTracker};
pub use timer::{TimerData, TimerDataEntry};

pub(crate) use timer::add_millis;

use crate::chart::{
    fired_channel, Chart, Executor, ExecutorError, FiredTimer, MachineSnapshot, RestoredDelay,
    Scheduler, Step,
};
use crate::clock::Clock;
use crate::core::{Context, Event, StateHistory, StateValue};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Executor whose delayed transitions are recorded as [`TimerData`].
pub struct TimerTrackingInterpreter<C> {
    executor: Executor<C, TimerTracker<ClockScheduler>>,
    clock: Arc<dyn Clock>,
}

impl<C: Context> TimerTrackingInterpreter<C> {
    pub fn new(chart: Arc<Chart<C>>, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = fired_channel();
        let scheduler = TimerTracker::new(ClockScheduler::new(Arc::clone(&clock), tx));
        Self {
            executor: Executor::new(chart, scheduler, rx),
            clock,
        }
    }

    /// Start in the configuration ending at `leaf`.
    ///
    /// See [`Executor::start`] for how `restored` plans are applied.
    pub fn start(
        &mut self,
        leaf: Vec<String>,
        context: C,
        event: &Event,
        restored: HashMap<String, RestoredDelay>,
    ) -> Result<(), ExecutorError> {
        self.executor.start(leaf, context, event, restored)
    }

    pub fn send(&mut self, event: &Event) -> Step {
        self.executor.send(event)
    }

    pub async fn next_fired(&mut self) -> Option<FiredTimer> {
        self.executor.next_fired().await
    }

    pub fn try_next_fired(&mut self) -> Option<FiredTimer> {
        self.executor.try_next_fired()
    }

    pub fn handle_fired(&mut self, fired: &FiredTimer) -> Step {
        self.executor.handle_fired(fired)
    }

    /// The live timer table.
    pub fn timers(&self) -> &TimerData {
        self.executor.scheduler().timers()
    }

    /// Time left on a pending timer.
    pub fn time_left(&self, id: &str) -> Option<Duration> {
        self.timers().get(id).map(|entry| entry.time_left(self.now()))
    }

    /// Stop the machine, keeping every pending timer entry.
    ///
    /// Returns the timer table as it stood when teardown began.
    pub fn stop_for_continuation(&mut self) -> TimerData {
        self.executor.scheduler_mut().begin_stop();
        self.executor.stop();
        let timers = self.timers().clone();
        debug!(
            machine = %self.executor.chart().id(),
            timers = timers.len(),
            "Stopped for continuation"
        );
        timers
    }

    /// Stop the machine, discarding pending timers.
    pub fn stop(&mut self) {
        self.executor.stop();
    }

    pub fn snapshot(&self) -> MachineSnapshot<C> {
        self.executor.snapshot()
    }

    pub fn state_value(&self) -> StateValue {
        self.executor.value()
    }

    pub fn context(&self) -> &C {
        self.executor.context()
    }

    pub fn is_done(&self) -> bool {
        self.executor.is_done()
    }

    pub fn is_running(&self) -> bool {
        self.executor.is_running()
    }

    pub fn history(&self) -> &StateHistory {
        self.executor.history()
    }

    pub fn set_history_limit(&mut self, limit: Option<usize>) {
        self.executor.set_history_limit(limit);
    }

    pub fn chart(&self) -> &Arc<Chart<C>> {
        self.executor.chart()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.executor.scheduler().now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
