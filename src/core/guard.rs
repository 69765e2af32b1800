//! Guard predicates for controlling transitions.
//!
//! Guards are pure boolean functions over the current context and the
//! triggering event. They enable declarative transition rules without
//! side effects.

use super::event::Event;
use std::fmt;
use std::sync::Arc;

/// Pure predicate that determines if a transition can execute.
///
/// Guards are evaluated while selecting a transition. They encapsulate
/// pre-conditions as pure functions, maintaining the "pure core" philosophy.
///
/// # Example
///
/// ```rust
/// use diachronic::core::{Event, Guard};
///
/// let under_limit = Guard::new(|count: &u32, _event: &Event| *count < 3);
///
/// assert!(under_limit.check(&2, &Event::new("hey")));
/// assert!(!under_limit.check(&3, &Event::new("hey")));
/// ```
pub struct Guard<C> {
    predicate: Arc<dyn Fn(&C, &Event) -> bool + Send + Sync>,
}

impl<C> Guard<C> {
    /// Create a guard from a pure predicate function.
    ///
    /// The predicate must be pure (deterministic, no side effects) and
    /// thread-safe (Send + Sync).
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> bool + Send + Sync + 'static,
    {
        Guard {
            predicate: Arc::new(predicate),
        }
    }

    /// Check if the guard allows a transition for this context and event.
    pub fn check(&self, context: &C, event: &Event) -> bool {
        (self.predicate)(context, event)
    }
}

impl<C> Clone for Guard<C> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<C> fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Guard(..)")
    }
}
