//! Builder for workflow definitions.

use super::migration::{DbSnapshot, MigrationError, MigrationFn};
use super::signal::SignalRouter;
use crate::chart::{BuildError, Chart};
use crate::clock::Clock;
use crate::continuation::Continuation;
use crate::core::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use stillwater::effect::BoxedEffect;

/// Host-tunable workflow settings.
///
/// Deserializable so hosts can load it from their own configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOptions {
    /// Task queue used by hand-offs that do not name one
    pub default_task_queue: Option<String>,
    /// Lower bound for the wait of a restored timer, in milliseconds.
    /// Values below 1 are raised to 1
    pub min_fire_in_ms: u64,
    /// Transitions kept in the in-memory history; `None` keeps all
    pub max_history: Option<usize>,
}

impl WorkflowOptions {
    /// Effective restored-timer floor, never below 1 ms.
    pub fn min_fire_in(&self) -> u64 {
        self.min_fire_in_ms.max(1)
    }
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            default_task_queue: None,
            min_fire_in_ms: 1,
            max_history: Some(1_000),
        }
    }
}

/// Everything needed to start or resume a workflow.
pub struct WorkflowDefinition<C: Context, Env: Clone + Send + Sync + 'static> {
    pub(crate) chart: Arc<Chart<C>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) env: Env,
    pub(crate) migration: Option<MigrationFn<C, Env>>,
    pub(crate) db_snapshot: Option<Arc<dyn DbSnapshot<C>>>,
    pub(crate) signals: SignalRouter,
    pub(crate) options: WorkflowOptions,
}

impl<C: Context, Env: Clone + Send + Sync + 'static> Clone for WorkflowDefinition<C, Env> {
    fn clone(&self) -> Self {
        Self {
            chart: Arc::clone(&self.chart),
            clock: Arc::clone(&self.clock),
            env: self.env.clone(),
            migration: self.migration.clone(),
            db_snapshot: self.db_snapshot.clone(),
            signals: self.signals.clone(),
            options: self.options.clone(),
        }
    }
}

impl<C: Context, Env: Clone + Send + Sync + 'static> WorkflowDefinition<C, Env> {
    pub fn chart(&self) -> &Arc<Chart<C>> {
        &self.chart
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }
}

/// Builder for [`WorkflowDefinition`] with a fluent API.
pub struct WorkflowBuilder<C: Context, Env: Clone + Send + Sync + 'static> {
    chart: Option<Arc<Chart<C>>>,
    clock: Option<Arc<dyn Clock>>,
    env: Env,
    migration: Option<MigrationFn<C, Env>>,
    db_snapshot: Option<Arc<dyn DbSnapshot<C>>>,
    signals: SignalRouter,
    options: WorkflowOptions,
}

impl<C: Context, Env: Clone + Send + Sync + 'static> WorkflowBuilder<C, Env> {
    /// Create a builder whose migration effects run against `env`.
    pub fn new(env: Env) -> Self {
        Self {
            chart: None,
            clock: None,
            env,
            migration: None,
            db_snapshot: None,
            signals: SignalRouter::new(),
            options: WorkflowOptions::default(),
        }
    }

    /// Set the machine chart (required).
    pub fn chart(self, chart: Chart<C>) -> Self {
        self.shared_chart(Arc::new(chart))
    }

    /// Set a chart already shared with other definitions.
    pub fn shared_chart(mut self, chart: Arc<Chart<C>>) -> Self {
        self.chart = Some(chart);
        self
    }

    /// Set the clock (required).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Migrate continuations written by the previous version.
    pub fn migration<F>(mut self, migrate: F) -> Self
    where
        F: Fn(Continuation<Value>) -> BoxedEffect<Continuation<C>, MigrationError, Env>
            + Send
            + Sync
            + 'static,
    {
        self.migration = Some(Arc::new(migrate));
        self
    }

    /// Keep an external db projection in sync on resume.
    pub fn db_snapshot(mut self, hook: impl DbSnapshot<C> + 'static) -> Self {
        self.db_snapshot = Some(Arc::new(hook));
        self
    }

    pub fn signals(mut self, signals: SignalRouter) -> Self {
        self.signals = signals;
        self
    }

    pub fn options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the definition.
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<WorkflowDefinition<C, Env>, BuildError> {
        let chart = self.chart.ok_or(BuildError::MissingChart)?;
        let clock = self.clock.ok_or(BuildError::MissingClock)?;
        Ok(WorkflowDefinition {
            chart,
            clock,
            env: self.env,
            migration: self.migration,
            db_snapshot: self.db_snapshot,
            signals: self.signals,
            options: self.options,
        })
    }
}
