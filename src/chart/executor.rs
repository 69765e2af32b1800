//! Chart executor and its scheduling port.
//!
//! The executor owns the active configuration and context of one machine
//! and advances it on events and fired timers. It never touches a clock:
//! delayed transitions go through the [`Scheduler`] port, so wrappers can
//! observe every schedule, cancel and fire by composition.

use super::error::ExecutorError;
use super::{Chart, DelayId, Tag, TransitionDef};
use crate::core::{Event, StateHistory, StateTransition, StateValue};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Notification that an armed timer's delay has elapsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: String,
    /// Arming generation; stale fires from earlier armings are ignored
    pub generation: u64,
}

/// Create the channel timer callbacks use to reach the executor.
pub fn fired_channel() -> (UnboundedSender<FiredTimer>, UnboundedReceiver<FiredTimer>) {
    mpsc::unbounded_channel()
}

/// A request to arm a delayed transition.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleRequest {
    /// Delay id, also used as the timer id
    pub id: String,
    pub generation: u64,
    /// Instant the delay is counted from
    pub start: DateTime<Utc>,
    /// Full delay in milliseconds, counted from `start`
    pub delay_ms: u64,
    /// Milliseconds from now until the timer should fire
    pub fire_in_ms: u64,
    /// Event that caused the owning state to be entered
    pub event: Event,
}

/// Arming plan for a delay carried over from a previous incarnation.
#[derive(Clone, Debug, PartialEq)]
pub struct RestoredDelay {
    pub start: DateTime<Utc>,
    pub delay_ms: u64,
    pub fire_in_ms: u64,
    pub event: Event,
}

/// Port through which the executor arms and cancels delayed transitions.
pub trait Scheduler {
    /// Current time, used to anchor new delays and stamp history.
    fn now(&self) -> DateTime<Utc>;

    /// Arm a timer, replacing any timer armed under the same id.
    fn schedule(&mut self, request: ScheduleRequest);

    /// Disarm a timer.
    fn cancel(&mut self, id: &str);

    /// Acknowledge that an armed timer fired and was consumed.
    fn fired(&mut self, id: &str);
}

/// An active state node, as seen by the migration gate.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveNode {
    pub state_id: String,
    pub tags: BTreeSet<Tag>,
    /// Whether the node has an outstanding invocation
    pub invoking: bool,
}

/// Point-in-time view of a running machine.
#[derive(Clone, Debug, PartialEq)]
pub struct MachineSnapshot<C> {
    pub value: StateValue,
    pub context: C,
    /// Active nodes from the root down to the leaf
    pub active: Vec<ActiveNode>,
    pub done: bool,
}

/// Outcome of delivering an event or a fired timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Step {
    /// A transition was taken (possibly targetless)
    Transitioned,
    /// Nothing in the active configuration handled the input
    Unhandled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    NotStarted,
    Running,
    Done,
    Stopped,
}

/// Executes a chart against a scheduler.
pub struct Executor<C, S> {
    chart: Arc<Chart<C>>,
    scheduler: S,
    fired: UnboundedReceiver<FiredTimer>,
    configuration: Vec<String>,
    context: C,
    status: Status,
    armed: HashMap<String, u64>,
    next_generation: u64,
    history: StateHistory,
}

impl<C: Clone, S: Scheduler> Executor<C, S> {
    /// Create an executor; `fired` must receive from the sender the
    /// scheduler's timer callbacks use.
    pub fn new(chart: Arc<Chart<C>>, scheduler: S, fired: UnboundedReceiver<FiredTimer>) -> Self {
        let context = chart.initial_context.clone();
        Self {
            chart,
            scheduler,
            fired,
            configuration: Vec::new(),
            context,
            status: Status::NotStarted,
            armed: HashMap::new(),
            next_generation: 0,
            history: StateHistory::new(),
        }
    }

    /// Enter the configuration ending in `leaf` with the given context.
    ///
    /// Delays listed in `restored` are armed with their carried-over plan;
    /// every other delay on the path is armed fresh from its delay function.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::AlreadyStarted`] if called twice.
    pub fn start(
        &mut self,
        leaf: Vec<String>,
        context: C,
        event: &Event,
        mut restored: HashMap<String, RestoredDelay>,
    ) -> Result<(), ExecutorError> {
        if self.status != Status::NotStarted {
            return Err(ExecutorError::AlreadyStarted {
                machine: self.chart.id.clone(),
            });
        }
        self.status = Status::Running;
        self.context = context;
        self.configuration = leaf.clone();
        for depth in 0..=leaf.len() {
            if let Some(path) = leaf.get(..depth) {
                self.enter(path, event, &mut restored);
            }
        }
        for id in restored.keys() {
            warn!(timer_id = %id, "Restored timer is not armed by the start configuration");
        }
        if self.chart.is_top_level_final(&leaf) {
            self.finish();
        }
        Ok(())
    }

    /// Deliver an event.
    ///
    /// The deepest active node with an enabled transition for the event
    /// wins; ancestors are consulted only if descendants do not handle it.
    pub fn send(&mut self, event: &Event) -> Step {
        if self.status != Status::Running {
            debug!(event = %event.event_type, "Event ignored, machine is not running");
            return Step::Unhandled;
        }
        let chart = Arc::clone(&self.chart);
        let selected = (0..=self.configuration.len()).rev().find_map(|depth| {
            let path = self.configuration.get(..depth)?;
            let node = chart.node(path)?;
            node.on
                .iter()
                .find(|(event_type, transition)| {
                    *event_type == event.event_type && transition.enabled(&self.context, event)
                })
                .map(|(_, transition)| (path.to_vec(), transition))
        });
        match selected {
            Some((source, transition)) => {
                self.take(&source, transition, event);
                Step::Transitioned
            }
            None => Step::Unhandled,
        }
    }

    /// Wait for the next fired timer.
    pub async fn next_fired(&mut self) -> Option<FiredTimer> {
        self.fired.recv().await
    }

    /// Take an already-fired timer without waiting.
    pub fn try_next_fired(&mut self) -> Option<FiredTimer> {
        self.fired.try_recv().ok()
    }

    /// Take the delayed transition of a fired timer.
    ///
    /// Fires for timers that were cancelled or re-armed since are ignored.
    pub fn handle_fired(&mut self, fired: &FiredTimer) -> Step {
        if self.status != Status::Running || self.armed.get(&fired.id) != Some(&fired.generation) {
            debug!(timer_id = %fired.id, generation = fired.generation, "Ignoring stale timer");
            return Step::Unhandled;
        }
        self.armed.remove(&fired.id);
        self.scheduler.fired(&fired.id);

        let chart = Arc::clone(&self.chart);
        let Ok(delay) = fired.id.parse::<DelayId>() else {
            return Step::Unhandled;
        };
        let Some(source) = chart.path_of(&delay.state_id) else {
            return Step::Unhandled;
        };
        let Some(after) = chart
            .node(&source)
            .and_then(|node| node.after.iter().find(|a| a.delay == delay.delay_name))
        else {
            return Step::Unhandled;
        };

        let event = Event::new(fired.id.clone());
        if !after.transition.enabled(&self.context, &event) {
            return Step::Unhandled;
        }
        self.take(&source, &after.transition, &event);
        Step::Transitioned
    }

    /// Stop the machine, disarming every timer.
    pub fn stop(&mut self) {
        self.disarm_all();
        if self.status != Status::Done {
            self.status = Status::Stopped;
        }
    }

    pub fn value(&self) -> StateValue {
        StateValue::from_path(&self.configuration)
            .unwrap_or_else(|| StateValue::Compound(BTreeMap::new()))
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn configuration(&self) -> &[String] {
        &self.configuration
    }

    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    pub fn history(&self) -> &StateHistory {
        &self.history
    }

    /// Keep at most `limit` transitions in the history.
    pub fn set_history_limit(&mut self, limit: Option<usize>) {
        self.history.set_limit(limit);
    }

    pub fn chart(&self) -> &Arc<Chart<C>> {
        &self.chart
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Snapshot of the active configuration (pure).
    pub fn snapshot(&self) -> MachineSnapshot<C> {
        let active = (0..=self.configuration.len())
            .filter_map(|depth| {
                let path = self.configuration.get(..depth)?;
                let node = self.chart.node(path)?;
                Some(ActiveNode {
                    state_id: self.chart.state_id(path),
                    tags: node.tags.clone(),
                    invoking: self.status == Status::Running && node.invoke.is_some(),
                })
            })
            .collect();
        MachineSnapshot {
            value: self.value(),
            context: self.context.clone(),
            active,
            done: self.is_done(),
        }
    }

    fn take(&mut self, source: &[String], transition: &TransitionDef<C>, event: &Event) {
        let from = self.value();
        let context = transition.apply(&self.context, event);

        if let Some(target) = transition.target() {
            let chart = Arc::clone(&self.chart);
            let Some(target_path) = chart.resolve_target(source, target) else {
                warn!(target, "Transition target does not resolve, ignoring");
                return;
            };
            let leaf = match chart.descend_initial(target_path.clone()) {
                Ok(leaf) => leaf,
                Err(err) => {
                    warn!(target, %err, "Transition target has no leaf, ignoring");
                    return;
                }
            };

            let common = source
                .iter()
                .zip(target_path.iter())
                .take_while(|(a, b)| a == b)
                .count();
            let shortest = source.len().min(target_path.len());
            // Self, ancestor and descendant targets are external: re-enter
            // from the parent of the shallower node.
            let domain = if common >= shortest {
                shortest.saturating_sub(1)
            } else {
                common
            };

            for depth in (domain + 1..=self.configuration.len()).rev() {
                if let Some(path) = self.configuration.get(..depth).map(<[String]>::to_vec) {
                    self.exit(&path);
                }
            }
            self.context = context;
            self.configuration = leaf.clone();
            for depth in domain + 1..=leaf.len() {
                if let Some(path) = leaf.get(..depth) {
                    self.enter(path, event, &mut HashMap::new());
                }
            }
            if chart.is_top_level_final(&leaf) {
                self.finish();
            }
        } else {
            self.context = context;
        }

        let transition = StateTransition {
            from,
            to: self.value(),
            event: event.event_type.clone(),
            timestamp: self.scheduler.now(),
        };
        self.history.push(transition);
    }

    fn enter(
        &mut self,
        path: &[String],
        event: &Event,
        restored: &mut HashMap<String, RestoredDelay>,
    ) {
        let chart = Arc::clone(&self.chart);
        let Some(node) = chart.node(path) else {
            return;
        };
        let state_id = chart.state_id(path);
        for after in &node.after {
            let id = DelayId::new(after.delay.clone(), state_id.clone()).to_string();
            if let Some(plan) = restored.remove(&id) {
                self.arm(id, plan);
                continue;
            }
            match chart.evaluate_delay(&after.delay, &self.context, event) {
                Some(delay_ms) => {
                    let plan = RestoredDelay {
                        start: self.scheduler.now(),
                        delay_ms,
                        fire_in_ms: delay_ms,
                        event: event.clone(),
                    };
                    self.arm(id, plan);
                }
                None => {
                    warn!(
                        timer_id = %id,
                        delay = %after.delay,
                        "No delay implementation, timer dropped"
                    );
                }
            }
        }
    }

    fn exit(&mut self, path: &[String]) {
        let chart = Arc::clone(&self.chart);
        let Some(node) = chart.node(path) else {
            return;
        };
        let state_id = chart.state_id(path);
        for after in &node.after {
            let id = DelayId::new(after.delay.clone(), state_id.clone()).to_string();
            if self.armed.remove(&id).is_some() {
                self.scheduler.cancel(&id);
            }
        }
    }

    fn arm(&mut self, id: String, plan: RestoredDelay) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.armed.insert(id.clone(), generation);
        self.scheduler.schedule(ScheduleRequest {
            id,
            generation,
            start: plan.start,
            delay_ms: plan.delay_ms,
            fire_in_ms: plan.fire_in_ms,
            event: plan.event,
        });
    }

    fn finish(&mut self) {
        self.disarm_all();
        self.status = Status::Done;
    }

    fn disarm_all(&mut self) {
        let ids: Vec<String> = self.armed.drain().map(|(id, _)| id).collect();
        for id in ids {
            self.scheduler.cancel(&id);
        }
    }
}
