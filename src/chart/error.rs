//! Errors for chart construction, resolution and execution.

use thiserror::Error;

/// Errors that can occur when building charts and workflows.
#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    #[error("Chart id must be non-empty and contain no '.' or '#'")]
    InvalidChartId,

    #[error("No states defined. Add at least one state")]
    NoStates,

    #[error("Initial context not specified. Call .context(value) before .build()")]
    MissingContext,

    #[error("Compound state '{state}' has no initial child. Call .initial(key)")]
    MissingInitialState { state: String },

    #[error("Initial child '{initial}' of '{state}' does not exist")]
    UnknownInitialState { state: String, initial: String },

    #[error("State key '{key}' is invalid: keys must be non-empty and contain no '.', '#', '(' or ')'")]
    InvalidKey { key: String },

    #[error("State '{key}' is defined more than once under '{parent}'")]
    DuplicateState { parent: String, key: String },

    #[error("Final state '{state}' cannot have children")]
    FinalWithChildren { state: String },

    #[error("Transition from '{source_state}' targets unknown state '{target}'")]
    UnknownTarget { source_state: String, target: String },

    #[error("Machine chart not specified. Call .chart(chart) before .build()")]
    MissingChart,

    #[error("Clock not specified. Call .clock(clock) before .build()")]
    MissingClock,
}

/// Errors resolving a state value against a chart.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("State '{state}' does not exist in machine '{machine}'")]
    UnknownState { machine: String, state: String },

    #[error("State '{state}' has parallel regions, which machine '{machine}' does not support")]
    ParallelUnsupported { machine: String, state: String },

    #[error("Compound state '{state}' has no initial child")]
    MissingInitial { state: String },
}

/// Errors from driving an executor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("Machine '{machine}' has already been started")]
    AlreadyStarted { machine: String },
}
