//! Queryable workflow state.

use crate::core::StateValue;
use crate::interpreter::TimerData;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateStatus {
    /// A migration was requested and waits for a safe point
    pub awaiting_continuation_condition: bool,
}

/// Projection of a workflow answered to snapshot queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: DeserializeOwned"))]
pub struct WorkflowSnapshot<C> {
    pub state: StateValue,
    pub context: C,
    pub timers: TimerData,
    pub migrate: MigrateStatus,
}
