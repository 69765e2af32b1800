//! Continuation payloads.
//!
//! A continuation is everything the next incarnation of a workflow needs
//! to pick up where the previous one stopped: the state value, the
//! context and the pending timers. It travels inside the workflow
//! arguments under [`CONTINUATION_KEY`].

use crate::core::StateValue;
use crate::interpreter::TimerData;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod error;
mod recompute;

pub use error::ContinuationError;
pub use recompute::{recompute, reconcile, Reconciled};

/// Reserved argument key marking a continuation.
pub const CONTINUATION_KEY: &str = "waas.continuation";

/// State handed from one incarnation to the next.
///
/// The context is untyped (`Value`) while in transit, since it was written
/// by whichever code version produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: DeserializeOwned"))]
pub struct Continuation<C = Value> {
    pub state: StateValue,
    pub context: C,
    pub timers: TimerData,
}

impl<C> Continuation<C> {
    /// Check the payload is internally consistent.
    pub fn validate(&self) -> Result<(), ContinuationError> {
        if self.state.leaf_paths().iter().all(|path| path.iter().all(String::is_empty)) {
            return Err(ContinuationError::EmptyState);
        }
        match self.timers.iter().find(|(key, entry)| **key != entry.id) {
            Some((key, entry)) => Err(ContinuationError::TimerKeyMismatch {
                key: key.clone(),
                id: entry.id.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl<C: Serialize> Continuation<C> {
    /// Erase the context type for transport.
    pub fn into_untyped(self) -> Result<Continuation<Value>, ContinuationError> {
        let context = serde_json::to_value(&self.context)
            .map_err(|e| ContinuationError::Serialization(e.to_string()))?;
        Ok(Continuation {
            state: self.state,
            context,
            timers: self.timers,
        })
    }
}

impl Continuation<Value> {
    /// Read the context as `C`.
    pub fn decode<C: DeserializeOwned>(self) -> Result<Continuation<C>, ContinuationError> {
        let context = serde_json::from_value(self.context)
            .map_err(|e| ContinuationError::Serialization(e.to_string()))?;
        Ok(Continuation {
            state: self.state,
            context,
            timers: self.timers,
        })
    }

    /// Render as workflow arguments for the next incarnation.
    pub fn to_args(&self) -> Result<Value, ContinuationError> {
        let payload = serde_json::to_value(self)
            .map_err(|e| ContinuationError::Serialization(e.to_string()))?;
        let mut args = Map::new();
        args.insert(CONTINUATION_KEY.to_string(), payload);
        Ok(Value::Object(args))
    }
}

/// Arguments a workflow run starts with, decided once at entry.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowArgs<C> {
    /// Start from the chart's initial state, optionally with a context
    /// other than the chart's initial one
    Fresh(Option<C>),
    /// Resume from a previous incarnation
    Continuation(Continuation<Value>),
}

impl<C: DeserializeOwned> WorkflowArgs<C> {
    /// Interpret raw host arguments.
    ///
    /// An object carrying [`CONTINUATION_KEY`] is a continuation and must
    /// pass [`Continuation::validate`]. Anything else is a fresh start;
    /// an optional `context` field overrides the initial context.
    ///
    /// # Errors
    ///
    /// Any [`ContinuationError`] is fatal: the run cannot proceed safely.
    pub fn from_json(args: Value) -> Result<Self, ContinuationError> {
        let Value::Object(mut fields) = args else {
            return Ok(Self::Fresh(None));
        };
        if let Some(payload) = fields.remove(CONTINUATION_KEY) {
            let continuation: Continuation<Value> = serde_json::from_value(payload)
                .map_err(|e| ContinuationError::InvalidPayload(e.to_string()))?;
            continuation.validate()?;
            return Ok(Self::Continuation(continuation));
        }
        match fields.remove("context") {
            Some(Value::Null) | None => Ok(Self::Fresh(None)),
            Some(context) => serde_json::from_value(context)
                .map(|context| Self::Fresh(Some(context)))
                .map_err(|e| ContinuationError::Serialization(e.to_string())),
        }
    }
}

impl<C: Serialize> WorkflowArgs<C> {
    pub fn to_json(&self) -> Result<Value, ContinuationError> {
        match self {
            Self::Continuation(continuation) => continuation.to_args(),
            Self::Fresh(None) => Ok(Value::Object(Map::new())),
            Self::Fresh(Some(context)) => {
                let context = serde_json::to_value(context)
                    .map_err(|e| ContinuationError::Serialization(e.to_string()))?;
                let mut args = Map::new();
                args.insert("context".to_string(), context);
                Ok(Value::Object(args))
            }
        }
    }
}
