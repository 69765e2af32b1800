//! Continuation protocol.
//!
//! A [`Workflow`] runs one incarnation of a long-lived machine. It starts
//! fresh or resumes from a continuation, forwards host signals to the
//! machine, answers snapshot queries, and on request hands the machine
//! off to the next incarnation once the configuration is a safe point.
//!
//! All work happens on the caller's task. Timers fire through the clock
//! into a channel that the workflow drains between host batches, so the
//! machine only ever moves on one logical thread.
//!
//! # Example
//!
//! ```rust
//! use diachronic::chart::{ChartBuilder, NodeBuilder, TransitionBuilder};
//! use diachronic::clock::VirtualClock;
//! use diachronic::continuation::WorkflowArgs;
//! use diachronic::core::StateValue;
//! use diachronic::workflow::{HostEvent, Workflow, WorkflowBuilder, WorkflowExit};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let chart = ChartBuilder::new("greeter")
//!     .context(0u32)
//!     .initial("initial")
//!     .state(
//!         NodeBuilder::new("initial")
//!             .on("hey", TransitionBuilder::to("heyed").assign(|n, _| n + 1)),
//!     )
//!     .state(NodeBuilder::new("heyed").after_ms(100_000, TransitionBuilder::to("initial")))
//!     .build()
//!     .unwrap();
//! let definition = WorkflowBuilder::new(())
//!     .chart(chart)
//!     .clock(Arc::new(VirtualClock::default()))
//!     .build()
//!     .unwrap();
//!
//! let mut workflow = Workflow::start(definition.clone(), WorkflowArgs::Fresh(None))
//!     .await
//!     .unwrap();
//! let exit = workflow
//!     .handle_batch(vec![
//!         HostEvent::signal("hey", json!({})),
//!         HostEvent::signal("migrate", json!({})),
//!     ])
//!     .unwrap();
//!
//! let Some(WorkflowExit::ContinuedAsNew(next)) = exit else {
//!     panic!("expected a hand-off");
//! };
//! let args = WorkflowArgs::from_json(next.to_args().unwrap()).unwrap();
//! let resumed = Workflow::start(definition, args).await.unwrap();
//! assert_eq!(resumed.query().state, StateValue::from("heyed"));
//! assert_eq!(resumed.query().context, 1);
//! # }
//! ```

mod builder;
mod error;
mod migration;
mod signal;
mod snapshot;

pub use builder::{WorkflowBuilder, WorkflowDefinition, WorkflowOptions};
pub use error::WorkflowError;
pub use migration::{DbSnapshot, MigrationError, MigrationFn, PersistError};
pub use signal::{
    DecodeError, Decoder, SignalRouter, META_KEY, MIGRATE_SIGNAL, RESET_SIGNAL, SNAPSHOT_QUERY,
};
pub use snapshot::{MigrateStatus, WorkflowSnapshot};

use crate::chart::{FiredTimer, Step};
use crate::continuation::{reconcile, Continuation, ContinuationError, WorkflowArgs};
use crate::core::{Context, Event, StateHistory, StateValue};
use crate::gate;
use crate::interpreter::{TimerData, TimerTrackingInterpreter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stillwater::effect::Effect;
use stillwater::validation::Validation;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Input delivered by the durable-execution host.
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    Signal { name: String, payload: Value },
    /// The host suggests continuing as new; treated as a migrate request
    /// on the same task queue
    ContinueAsNewSuggested,
}

impl HostEvent {
    pub fn signal(name: impl Into<String>, payload: Value) -> Self {
        Self::Signal {
            name: name.into(),
            payload,
        }
    }
}

/// Request to restart as a new incarnation.
#[derive(Clone, Debug, PartialEq)]
pub struct ContinueAsNew {
    pub continuation: Continuation<Value>,
    /// `None` keeps the current task queue
    pub task_queue: Option<String>,
}

impl ContinueAsNew {
    /// Arguments for the next incarnation.
    pub fn to_args(&self) -> Result<Value, ContinuationError> {
        self.continuation.to_args()
    }
}

/// How an incarnation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowExit<C> {
    /// The machine reached a top-level final state
    Completed(WorkflowSnapshot<C>),
    /// The machine was handed off
    ContinuedAsNew(ContinueAsNew),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrateRequest {
    #[serde(default)]
    task_queue: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest {
    state: StateValue,
    context: Value,
    timers: TimerData,
    #[serde(default)]
    task_queue: Option<String>,
}

enum Wake {
    Host(Option<HostEvent>),
    Timer(Option<FiredTimer>),
}

/// One running incarnation of a workflow.
pub struct Workflow<C: Context, Env: Clone + Send + Sync + 'static> {
    definition: WorkflowDefinition<C, Env>,
    interpreter: TimerTrackingInterpreter<C>,
    pending_migration: Option<MigrateRequest>,
    exited: bool,
    snapshots: watch::Sender<WorkflowSnapshot<C>>,
}

impl<C: Context, Env: Clone + Send + Sync + 'static> Workflow<C, Env> {
    /// Start from raw host arguments.
    pub async fn start_json(
        definition: WorkflowDefinition<C, Env>,
        args: Value,
    ) -> Result<Self, WorkflowError> {
        let args = WorkflowArgs::from_json(args)?;
        Self::start(definition, args).await
    }

    /// Start fresh or resume from a continuation.
    ///
    /// # Errors
    ///
    /// Fatal conditions: an invalid continuation, a failed migration
    /// effect, or a resumed state the chart does not contain.
    pub async fn start(
        definition: WorkflowDefinition<C, Env>,
        args: WorkflowArgs<C>,
    ) -> Result<Self, WorkflowError> {
        let chart = Arc::clone(&definition.chart);
        let mut interpreter =
            TimerTrackingInterpreter::new(Arc::clone(&chart), Arc::clone(&definition.clock));
        interpreter.set_history_limit(definition.options.max_history);

        match args {
            WorkflowArgs::Fresh(context) => {
                let leaf = chart.initial_leaf()?;
                let context = context.unwrap_or_else(|| chart.initial_context().clone());
                info!(machine = %chart.id(), "Starting workflow");
                interpreter.start(leaf, context, &Event::init(), HashMap::new())?;
            }
            WorkflowArgs::Continuation(previous) => {
                info!(
                    machine = %chart.id(),
                    state = %previous.state,
                    timers = previous.timers.len(),
                    "Resuming workflow"
                );
                let mut resumed = match &definition.migration {
                    Some(migrate) => migrate(previous).run(&definition.env).await?,
                    None => previous.decode()?,
                };
                resumed.validate()?;
                if let Some(hook) = &definition.db_snapshot {
                    migration::sync_db_snapshot(hook.as_ref(), &mut resumed.context);
                }

                let leaf = chart.resolve(&resumed.state)?;
                let reconciled = reconcile(
                    &chart,
                    &leaf,
                    &resumed.context,
                    &resumed.timers,
                    interpreter.now(),
                    definition.options.min_fire_in(),
                );
                info!(
                    restored = reconciled.restored.len(),
                    dropped = reconciled.dropped.len(),
                    "Timers reconciled"
                );
                interpreter.start(leaf, resumed.context, &Event::init(), reconciled.restored)?;
            }
        }

        let (snapshots, _) = watch::channel(snapshot_of(&interpreter, false));
        Ok(Self {
            definition,
            interpreter,
            pending_migration: None,
            exited: false,
            snapshots,
        })
    }

    /// Process one host batch in arrival order.
    ///
    /// Migrate requests take effect after every other signal of the batch
    /// has reached the machine. A reset exits at once; the rest of the
    /// batch is discarded with the incarnation.
    pub fn handle_batch(
        &mut self,
        events: impl IntoIterator<Item = HostEvent>,
    ) -> Result<Option<WorkflowExit<C>>, WorkflowError> {
        self.ensure_running()?;
        if let Some(exit) = self.completion() {
            return Ok(Some(exit));
        }

        let mut migrate = None;
        for event in events {
            let exit = match event {
                HostEvent::ContinueAsNewSuggested => {
                    debug!("Host suggested continue-as-new");
                    migrate.get_or_insert_with(MigrateRequest::default);
                    None
                }
                HostEvent::Signal { name, payload } if name == MIGRATE_SIGNAL => {
                    match decode_migrate(payload) {
                        Ok(request) => migrate = Some(request),
                        Err(err) => warn!(%err, "Ignoring migrate signal"),
                    }
                    None
                }
                HostEvent::Signal { name, payload } if name == RESET_SIGNAL => {
                    match decode_reserved::<ResetRequest>(&name, payload) {
                        Ok(request) => self.reset(request)?,
                        Err(err) => {
                            warn!(%err, "Ignoring reset signal");
                            None
                        }
                    }
                }
                HostEvent::Signal { name, payload } => {
                    match self.definition.signals.route(&name, payload) {
                        Ok(event) => self.deliver(&event)?,
                        Err(err) => {
                            warn!(%err, "Dropping undecodable signal");
                            None
                        }
                    }
                }
            };
            if exit.is_some() {
                return Ok(exit);
            }
        }

        match migrate {
            Some(request) => self.request_migration(request),
            None => Ok(None),
        }
    }

    /// Deliver a single host event.
    pub fn handle(&mut self, event: HostEvent) -> Result<Option<WorkflowExit<C>>, WorkflowError> {
        self.handle_batch([event])
    }

    /// Take the delayed transition of a fired timer.
    pub fn handle_fired(
        &mut self,
        fired: &FiredTimer,
    ) -> Result<Option<WorkflowExit<C>>, WorkflowError> {
        self.ensure_running()?;
        match self.interpreter.handle_fired(fired) {
            Step::Transitioned => self.after_transition(),
            Step::Unhandled => Ok(None),
        }
    }

    /// Handle every timer that has already fired.
    pub fn fire_due(&mut self) -> Result<Option<WorkflowExit<C>>, WorkflowError> {
        while let Some(fired) = self.interpreter.try_next_fired() {
            if let Some(exit) = self.handle_fired(&fired)? {
                return Ok(Some(exit));
            }
        }
        Ok(None)
    }

    /// Drive the workflow until it exits.
    ///
    /// Every host event already queued when the loop wakes forms one
    /// batch. Fired timers are handled between batches.
    pub async fn run(
        &mut self,
        inbox: &mut mpsc::UnboundedReceiver<HostEvent>,
    ) -> Result<WorkflowExit<C>, WorkflowError> {
        loop {
            self.ensure_running()?;
            if let Some(exit) = self.completion() {
                return Ok(exit);
            }
            if let Some(exit) = self.fire_due()? {
                return Ok(exit);
            }

            let wake = tokio::select! {
                biased;
                event = inbox.recv() => Wake::Host(event),
                fired = self.interpreter.next_fired() => Wake::Timer(fired),
            };
            let exit = match wake {
                Wake::Host(Some(first)) => {
                    let mut batch = vec![first];
                    while let Ok(event) = inbox.try_recv() {
                        batch.push(event);
                    }
                    self.handle_batch(batch)?
                }
                Wake::Timer(Some(fired)) => self.handle_fired(&fired)?,
                Wake::Host(None) => return Err(WorkflowError::Disconnected { channel: "host" }),
                Wake::Timer(None) => return Err(WorkflowError::Disconnected { channel: "timer" }),
            };
            if let Some(exit) = exit {
                return Ok(exit);
            }
        }
    }

    /// Current snapshot, as answered to snapshot queries.
    pub fn query(&self) -> WorkflowSnapshot<C> {
        snapshot_of(&self.interpreter, self.pending_migration.is_some())
    }

    /// Receiver that always holds the snapshot of the last transition.
    pub fn snapshots(&self) -> watch::Receiver<WorkflowSnapshot<C>> {
        self.snapshots.subscribe()
    }

    pub fn is_awaiting_migration(&self) -> bool {
        self.pending_migration.is_some()
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// Time left on a pending timer.
    pub fn time_left(&self, timer_id: &str) -> Option<Duration> {
        self.interpreter.time_left(timer_id)
    }

    pub fn timers(&self) -> &TimerData {
        self.interpreter.timers()
    }

    pub fn history(&self) -> &StateHistory {
        self.interpreter.history()
    }

    pub fn definition(&self) -> &WorkflowDefinition<C, Env> {
        &self.definition
    }

    fn ensure_running(&self) -> Result<(), WorkflowError> {
        if self.exited {
            Err(WorkflowError::Exited)
        } else {
            Ok(())
        }
    }

    fn deliver(&mut self, event: &Event) -> Result<Option<WorkflowExit<C>>, WorkflowError> {
        match self.interpreter.send(event) {
            Step::Transitioned => self.after_transition(),
            Step::Unhandled => {
                debug!(event = %event.event_type, "Event not handled in current state");
                Ok(None)
            }
        }
    }

    fn after_transition(&mut self) -> Result<Option<WorkflowExit<C>>, WorkflowError> {
        self.publish();
        if let Some(request) = &self.pending_migration {
            if gate::can_migrate(&self.interpreter.snapshot()) {
                let task_queue = request.task_queue.clone();
                info!(state = %self.interpreter.state_value(), "Safe point reached");
                return self.hand_off(task_queue).map(Some);
            }
            return Ok(None);
        }
        Ok(self.completion())
    }

    fn request_migration(
        &mut self,
        request: MigrateRequest,
    ) -> Result<Option<WorkflowExit<C>>, WorkflowError> {
        info!(task_queue = ?request.task_queue, "Migration requested");
        if self.pending_migration.is_some() {
            debug!("Migration already awaiting a safe point");
            return Ok(None);
        }
        match gate::evaluate(&self.interpreter.snapshot().active) {
            Validation::Success(_) => self.hand_off(request.task_queue).map(Some),
            Validation::Failure(blockers) => {
                for blocker in blockers.iter() {
                    info!(%blocker, "Migration deferred");
                }
                self.pending_migration = Some(request);
                self.publish();
                Ok(None)
            }
        }
    }

    fn hand_off(&mut self, task_queue: Option<String>) -> Result<WorkflowExit<C>, WorkflowError> {
        let timers = self.interpreter.stop_for_continuation();
        let continuation = Continuation {
            state: self.interpreter.state_value(),
            context: self.interpreter.context().clone(),
            timers,
        }
        .into_untyped()?;
        self.pending_migration = None;
        self.exited = true;
        let task_queue = task_queue.or_else(|| self.definition.options.default_task_queue.clone());
        info!(state = %continuation.state, task_queue = ?task_queue, "Continuing as new");
        Ok(WorkflowExit::ContinuedAsNew(ContinueAsNew {
            continuation,
            task_queue,
        }))
    }

    fn reset(&mut self, request: ResetRequest) -> Result<Option<WorkflowExit<C>>, WorkflowError> {
        let continuation = Continuation {
            state: request.state,
            context: request.context,
            timers: request.timers,
        };
        if let Err(err) = continuation.validate() {
            warn!(%err, "Ignoring reset signal");
            return Ok(None);
        }
        self.interpreter.stop();
        self.pending_migration = None;
        self.exited = true;
        warn!(state = %continuation.state, "Resetting workflow");
        Ok(Some(WorkflowExit::ContinuedAsNew(ContinueAsNew {
            continuation,
            task_queue: request.task_queue,
        })))
    }

    /// Exit as completed if the machine is done and no hand-off is pending.
    fn completion(&mut self) -> Option<WorkflowExit<C>> {
        if self.exited || self.pending_migration.is_some() || !self.interpreter.is_done() {
            return None;
        }
        self.exited = true;
        let snapshot = self.query();
        info!(state = %snapshot.state, "Workflow completed");
        Some(WorkflowExit::Completed(snapshot))
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.query());
    }
}

fn snapshot_of<C: Context>(
    interpreter: &TimerTrackingInterpreter<C>,
    awaiting: bool,
) -> WorkflowSnapshot<C> {
    WorkflowSnapshot {
        state: interpreter.state_value(),
        context: interpreter.context().clone(),
        timers: interpreter.timers().clone(),
        migrate: MigrateStatus {
            awaiting_continuation_condition: awaiting,
        },
    }
}

fn decode_migrate(payload: Value) -> Result<MigrateRequest, DecodeError> {
    if payload.is_null() {
        return Ok(MigrateRequest::default());
    }
    decode_reserved(MIGRATE_SIGNAL, payload)
}

fn decode_reserved<T: DeserializeOwned>(signal: &str, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|e| DecodeError::new(signal, e.to_string()))
}
