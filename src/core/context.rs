//! Bounds for machine context (extended state).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Trait for machine context values.
///
/// Context travels inside continuation payloads, so it must serialize, and
/// it is mirrored to concurrent query readers, so it must be `Send + Sync`.
///
/// # Required Traits
///
/// - `Clone`: context is copied into snapshots and history
/// - `PartialEq`: snapshots are compared across incarnations
/// - `Debug`: context appears in diagnostics
/// - `Serialize` + `DeserializeOwned`: context crosses the process boundary
///
/// Implemented automatically for every type meeting the bounds.
///
/// # Example
///
/// ```rust
/// use diachronic::core::Context;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// struct Counter {
///     count: u32,
/// }
///
/// fn assert_context<C: Context>() {}
/// assert_context::<Counter>();
/// assert_context::<serde_json::Value>();
/// ```
pub trait Context:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Context for T where
    T: Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}
