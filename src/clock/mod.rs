//! Pluggable time sources.
//!
//! Every time-dependent part of the engine reads time and arms timers
//! through [`Clock`], so the same workflow runs against real time in
//! production ([`WallClock`]) and against simulated time in tests
//! ([`VirtualClock`]), where days-long waits elapse instantly and in a
//! reproducible order.

mod virtual_clock;
mod wall;

pub use virtual_clock::VirtualClock;
pub use wall::WallClock;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Handle identifying an armed timer, used to clear it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TimerHandle(pub u64);

/// Errors constructing a clock.
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("Wall clock requires a running tokio runtime: {0}")]
    NoRuntime(String),
}

/// Time source used by the interpreter and the continuation protocol.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller until `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Run `callback` once `delay` has elapsed on this clock.
    fn set_timer(&self, callback: TimerCallback, delay: Duration) -> TimerHandle;

    /// Disarm a timer. Clearing a fired or unknown handle is a no-op.
    fn clear_timer(&self, handle: TimerHandle);
}
