//! Scheduler implementations: the clock-backed base and the tracking wrapper.

use super::timer::{TimerData, TimerDataEntry};
use crate::chart::{DelayId, FiredTimer, ScheduleRequest, Scheduler};
use crate::clock::{Clock, TimerHandle};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};

/// Arms delayed transitions as clock timers.
///
/// A fired timer is reported on the channel rather than handled in the
/// callback, so the executor consumes it on its own logical thread.
pub struct ClockScheduler {
    clock: Arc<dyn Clock>,
    fired: UnboundedSender<FiredTimer>,
    handles: HashMap<String, TimerHandle>,
}

impl ClockScheduler {
    pub fn new(clock: Arc<dyn Clock>, fired: UnboundedSender<FiredTimer>) -> Self {
        Self {
            clock,
            fired,
            handles: HashMap::new(),
        }
    }

    /// Number of timers armed on the clock.
    pub fn armed(&self) -> usize {
        self.handles.len()
    }
}

impl Scheduler for ClockScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn schedule(&mut self, request: ScheduleRequest) {
        if let Some(previous) = self.handles.remove(&request.id) {
            self.clock.clear_timer(previous);
        }
        let sender = self.fired.clone();
        let fired = FiredTimer {
            id: request.id.clone(),
            generation: request.generation,
        };
        let handle = self.clock.set_timer(
            Box::new(move || {
                // The receiver is gone once the interpreter is dropped.
                let _ = sender.send(fired);
            }),
            Duration::from_millis(request.fire_in_ms),
        );
        self.handles.insert(request.id, handle);
    }

    fn cancel(&mut self, id: &str) {
        if let Some(handle) = self.handles.remove(id) {
            self.clock.clear_timer(handle);
        }
    }

    fn fired(&mut self, id: &str) {
        self.handles.remove(id);
    }
}

/// Scheduler wrapper that keeps a durable table of pending timers.
///
/// Every schedule records a [`TimerDataEntry`]; firing and ordinary
/// cancellation remove it. While stopping for a continuation, cancellation
/// leaves entries in place so they survive into the continuation payload.
pub struct TimerTracker<S> {
    inner: S,
    timers: TimerData,
    stopping: bool,
}

impl<S: Scheduler> TimerTracker<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            timers: TimerData::new(),
            stopping: false,
        }
    }

    /// The live timer table.
    pub fn timers(&self) -> &TimerData {
        &self.timers
    }

    /// Enter the stopping-for-continuation phase.
    pub fn begin_stop(&mut self) {
        self.stopping = true;
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Scheduler> Scheduler for TimerTracker<S> {
    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }

    fn schedule(&mut self, request: ScheduleRequest) {
        match request.id.parse::<DelayId>() {
            Ok(delay) => {
                let entry = TimerDataEntry {
                    id: request.id.clone(),
                    start: request.start,
                    delay: request.delay_ms,
                    delay_function_name: delay.delay_name,
                    state_id: delay.state_id,
                    event: request.event.clone(),
                };
                self.timers.insert(request.id.clone(), entry);
            }
            Err(err) => {
                error!(timer_id = %request.id, %err, "Untracked timer: id is not a delay id");
            }
        }
        self.inner.schedule(request);
    }

    fn cancel(&mut self, id: &str) {
        if self.stopping {
            debug!(timer_id = %id, "Keeping timer for continuation");
        } else {
            self.timers.remove(id);
        }
        self.inner.cancel(id);
    }

    fn fired(&mut self, id: &str) {
        self.timers.remove(id);
        self.inner.fired(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::fired_channel;
    use crate::clock::VirtualClock;
    use crate::core::Event;

    fn request(id: &str, delay_ms: u64, generation: u64, clock: &VirtualClock) -> ScheduleRequest {
        ScheduleRequest {
            id: id.to_string(),
            generation,
            start: clock.now(),
            delay_ms,
            fire_in_ms: delay_ms,
            event: Event::new("hey"),
        }
    }

    const HEYED: &str = "after(100000)#greeter.heyed";

    #[test]
    fn clock_scheduler_reports_fires_on_the_channel() {
        let clock = VirtualClock::default();
        let (tx, mut rx) = fired_channel();
        let mut scheduler = ClockScheduler::new(Arc::new(clock.clone()), tx);

        scheduler.schedule(request(HEYED, 100, 7, &clock));
        assert_eq!(scheduler.armed(), 1);
        assert!(rx.try_recv().is_err());

        clock.advance(Duration::from_millis(100));
        let fired = rx.try_recv().unwrap();
        assert_eq!(fired, FiredTimer { id: HEYED.to_string(), generation: 7 });
    }

    #[test]
    fn clock_scheduler_cancel_clears_the_clock_timer() {
        let clock = VirtualClock::default();
        let (tx, mut rx) = fired_channel();
        let mut scheduler = ClockScheduler::new(Arc::new(clock.clone()), tx);

        scheduler.schedule(request(HEYED, 100, 0, &clock));
        scheduler.cancel(HEYED);
        assert_eq!(clock.pending(), 0);

        clock.advance(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rescheduling_replaces_the_previous_timer() {
        let clock = VirtualClock::default();
        let (tx, _rx) = fired_channel();
        let mut scheduler = ClockScheduler::new(Arc::new(clock.clone()), tx);

        scheduler.schedule(request(HEYED, 100, 0, &clock));
        scheduler.schedule(request(HEYED, 200, 1, &clock));
        assert_eq!(clock.pending(), 1);
    }

    fn tracker(clock: &VirtualClock) -> TimerTracker<ClockScheduler> {
        let (tx, _rx) = fired_channel();
        TimerTracker::new(ClockScheduler::new(Arc::new(clock.clone()), tx))
    }

    #[test]
    fn tracker_records_parsed_entries() {
        let clock = VirtualClock::default();
        let mut tracker = tracker(&clock);
        tracker.schedule(request(HEYED, 100_000, 0, &clock));

        let entry = &tracker.timers()[HEYED];
        assert_eq!(entry.delay, 100_000);
        assert_eq!(entry.delay_function_name, "100000");
        assert_eq!(entry.state_id, "greeter.heyed");
        assert_eq!(entry.start, clock.now());
        assert_eq!(entry.event, Event::new("hey"));
    }

    #[test]
    fn tracker_drops_malformed_ids_without_failing() {
        let clock = VirtualClock::default();
        let mut tracker = tracker(&clock);
        tracker.schedule(request("not-a-delay", 10, 0, &clock));

        assert!(tracker.timers().is_empty());
        assert_eq!(tracker.inner().armed(), 1);
    }

    #[test]
    fn ordinary_cancel_removes_the_entry() {
        let clock = VirtualClock::default();
        let mut tracker = tracker(&clock);
        tracker.schedule(request(HEYED, 10, 0, &clock));
        tracker.cancel(HEYED);

        assert!(tracker.timers().is_empty());
        assert_eq!(tracker.inner().armed(), 0);
    }

    #[test]
    fn cancel_while_stopping_keeps_the_entry() {
        let clock = VirtualClock::default();
        let mut tracker = tracker(&clock);
        tracker.schedule(request(HEYED, 10, 0, &clock));
        assert!(!tracker.is_stopping());
        tracker.begin_stop();
        assert!(tracker.is_stopping());
        tracker.cancel(HEYED);

        assert!(tracker.timers().contains_key(HEYED));
        assert_eq!(tracker.inner().armed(), 0);
    }

    #[test]
    fn firing_removes_the_entry() {
        let clock = VirtualClock::default();
        let mut tracker = tracker(&clock);
        tracker.schedule(request(HEYED, 10, 0, &clock));
        tracker.fired(HEYED);

        assert!(tracker.timers().is_empty());
    }
}
