//! Diachronic: live migration for long-running state machine workflows
//!
//! A workflow runs a hierarchical state machine inside a durable-execution
//! host. When new code ships, the running instance hands itself off to the
//! next version through a continuation carrying its state, its context
//! and every pending timer, so a wait of days survives the deploy with its
//! remaining time intact.
//!
//! # Core Concepts
//!
//! - **Chart**: immutable machine definition, built with [`chart::ChartBuilder`]
//! - **Clock**: wall-clock or virtual time behind one [`clock::Clock`] trait
//! - **Interpreter**: executor that records pending timers as plain data
//! - **Gate**: decides whether the active configuration is a safe point
//! - **Continuation**: the payload handed to the next incarnation
//! - **Workflow**: the protocol tying them together on one logical thread
//!
//! # Example
//!
//! ```rust
//! use diachronic::chart::{ChartBuilder, NodeBuilder, TransitionBuilder};
//! use diachronic::gate;
//! use diachronic::core::Event;
//! use diachronic::clock::VirtualClock;
//! use diachronic::interpreter::TimerTrackingInterpreter;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let chart = ChartBuilder::new("payments")
//!     .context(0u64)
//!     .initial("idle")
//!     .state(NodeBuilder::new("idle").on("pay", TransitionBuilder::to("charging")))
//!     .state(
//!         NodeBuilder::new("charging")
//!             .invoke("charge-card")
//!             .on("charged", TransitionBuilder::to("idle")),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let clock = Arc::new(VirtualClock::default());
//! let mut interpreter = TimerTrackingInterpreter::new(Arc::new(chart), clock);
//! interpreter
//!     .start(vec!["idle".to_string()], 0, &Event::init(), HashMap::new())
//!     .unwrap();
//! assert!(gate::can_migrate(&interpreter.snapshot()));
//!
//! let _ = interpreter.send(&Event::new("pay"));
//! assert!(!gate::can_migrate(&interpreter.snapshot()));
//! ```

pub mod chart;
pub mod clock;
pub mod continuation;
pub mod core;
pub mod gate;
pub mod interpreter;
pub mod workflow;

// Re-export commonly used types
pub use chart::{Chart, ChartBuilder, NodeBuilder, Tag, TransitionBuilder};
pub use clock::{Clock, VirtualClock, WallClock};
pub use continuation::{Continuation, WorkflowArgs};
pub use core::{Context, Event, StateValue};
pub use workflow::{
    HostEvent, Workflow, WorkflowBuilder, WorkflowError, WorkflowExit, WorkflowSnapshot,
};
