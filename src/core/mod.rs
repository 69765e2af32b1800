//! Core value types shared by every layer.
//!
//! This module contains the pure functional core:
//! - State values and events as they appear on the wire
//! - The `Context` bound for extended state
//! - Guard predicates for transition control
//! - Immutable history tracking
//!
//! All logic in this module is pure (no side effects).

mod context;
mod event;
mod guard;
mod history;
mod value;

pub use context::Context;
pub use event::{Event, INIT_EVENT};
pub use guard::Guard;
pub use history::{StateHistory, StateTransition};
pub use value::StateValue;
