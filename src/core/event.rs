//! Events delivered to a running machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type of the synthetic event used when a machine is started or resumed.
pub const INIT_EVENT: &str = "diachronic.init";

/// An event delivered to the machine.
///
/// Business signals arrive in this envelope shape: `{ type, meta?, payload }`.
/// Delayed transitions fire with the event that armed them.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Event type, matched against `on` transitions
    #[serde(rename = "type")]
    pub event_type: String,

    /// Host metadata stripped from the raw signal payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    /// Decoded event payload
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Create an event with no payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            meta: None,
            payload: Value::Null,
        }
    }

    /// Create an event carrying a payload.
    pub fn with_payload(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            meta: None,
            payload,
        }
    }

    /// The event used to enter the start configuration.
    pub fn init() -> Self {
        Self::new(INIT_EVENT)
    }
}
