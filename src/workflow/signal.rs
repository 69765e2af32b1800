//! Business signal decoding.

use crate::core::Event;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Reserved payload key carrying signal metadata.
pub const META_KEY: &str = "waas.meta";

/// Signal requesting a hand-off to the next incarnation.
pub const MIGRATE_SIGNAL: &str = "migrate";

/// Signal forcing a hand-off with a literal continuation.
pub const RESET_SIGNAL: &str = "reset";

/// Query name hosts should answer with [`super::Workflow::query`].
pub const SNAPSHOT_QUERY: &str = "snapshot";

/// A signal payload that could not be decoded.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Signal '{signal}' has a malformed payload: {message}")]
pub struct DecodeError {
    pub signal: String,
    pub message: String,
}

impl DecodeError {
    pub fn new(signal: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            message: message.into(),
        }
    }
}

/// Decoder turning a raw signal payload into an event payload.
pub type Decoder = Arc<dyn Fn(Value) -> Result<Value, DecodeError> + Send + Sync>;

/// Maps signal names to decoders.
///
/// Signals without a registered decoder are forwarded with their raw
/// payload.
///
/// # Example
///
/// ```rust
/// use diachronic::workflow::SignalRouter;
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Serialize, Deserialize)]
/// struct Greeting {
///     name: String,
/// }
///
/// let router = SignalRouter::new().register::<Greeting>("hey");
///
/// let event = router
///     .route("hey", json!({"name": "ada", "waas.meta": {"source": "cli"}}))
///     .unwrap();
/// assert_eq!(event.event_type, "hey");
/// assert_eq!(event.payload, json!({"name": "ada"}));
/// assert_eq!(event.meta, Some(json!({"source": "cli"})));
///
/// assert!(router.route("hey", json!({"name": 7})).is_err());
/// ```
#[derive(Clone, Default)]
pub struct SignalRouter {
    decoders: HashMap<String, Decoder>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode payloads of `signal` as `T`.
    pub fn register<T>(self, signal: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        let signal = signal.into();
        let name = signal.clone();
        self.register_with(signal, move |payload| {
            let decoded: T = serde_json::from_value(payload)
                .map_err(|e| DecodeError::new(name.clone(), e.to_string()))?;
            serde_json::to_value(decoded).map_err(|e| DecodeError::new(name.clone(), e.to_string()))
        })
    }

    /// Decode payloads of `signal` with a custom function.
    pub fn register_with<F>(mut self, signal: impl Into<String>, decoder: F) -> Self
    where
        F: Fn(Value) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        self.decoders.insert(signal.into(), Arc::new(decoder));
        self
    }

    pub fn is_registered(&self, signal: &str) -> bool {
        self.decoders.contains_key(signal)
    }

    /// Build the event for a raw signal.
    ///
    /// The metadata key is stripped from object payloads before decoding
    /// and carried as the event's `meta`.
    pub fn route(&self, signal: &str, payload: Value) -> Result<Event, DecodeError> {
        let (payload, meta) = split_meta(payload);
        let payload = match self.decoders.get(signal) {
            Some(decode) => decode(payload)?,
            None => payload,
        };
        Ok(Event {
            event_type: signal.to_string(),
            meta,
            payload,
        })
    }
}

impl fmt::Debug for SignalRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut signals: Vec<&String> = self.decoders.keys().collect();
        signals.sort();
        f.debug_struct("SignalRouter").field("signals", &signals).finish()
    }
}

fn split_meta(payload: Value) -> (Value, Option<Value>) {
    match payload {
        Value::Object(mut fields) => {
            let meta = fields.remove(META_KEY);
            (Value::Object(fields), meta)
        }
        other => (other, None),
    }
}
