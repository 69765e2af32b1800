//! Wall-clock time backed by the tokio timer.

use super::{Clock, ClockError, TimerCallback, TimerHandle};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Real time. Timers are tokio tasks that sleep and then run the callback.
///
/// `now` is read off the tokio clock, anchored to the UTC time at
/// construction, so it agrees with when timers fire even when tokio time
/// is paused or the system clock jumps.
#[derive(Clone)]
pub struct WallClock {
    runtime: Handle,
    origin: DateTime<Utc>,
    anchor: Instant,
    next_handle: Arc<AtomicU64>,
    tasks: Arc<Mutex<HashMap<TimerHandle, JoinHandle<()>>>>,
}

impl WallClock {
    /// Create a clock whose timers run on the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            origin: Utc::now(),
            anchor: Instant::now(),
            next_handle: Arc::new(AtomicU64::new(0)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a clock on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ClockError::NoRuntime`] when called outside a runtime.
    pub fn current() -> Result<Self, ClockError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|err| ClockError::NoRuntime(err.to_string()))
    }

    /// Number of armed timers that have not fired or been cleared.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Clock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.anchor.elapsed())
            .ok()
            .and_then(|elapsed| self.origin.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }

    fn set_timer(&self, callback: TimerCallback, delay: Duration) -> TimerHandle {
        let handle = TimerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let tasks = Arc::clone(&self.tasks);
        // Hold the lock across spawn so the task cannot finish (and try to
        // remove itself) before it is registered.
        let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&handle);
            callback();
        });
        guard.insert(handle, task);
        handle
    }

    fn clear_timer(&self, handle: TimerHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        if let Some(task) = task {
            task.abort();
        }
    }
}
