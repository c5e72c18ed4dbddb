//! Coalescing wake-up signal for background stages
//!
//! Every pipeline stage runs on one dedicated thread that sleeps on a
//! `StageSignal`. Notifying a stage that is already running only sets the
//! pending flag, so the stage makes exactly one more pass after finishing
//! the current one. Triggers never queue up and a stage never runs twice
//! concurrently.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub(crate) struct StageSignal {
    pending: Mutex<bool>,
    ready: Condvar,
}

impl StageSignal {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    /// Request one more pass of the stage
    pub(crate) fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.ready.notify_one();
    }

    /// Block until notified, the timeout elapses, or shutdown is requested
    ///
    /// Returns `false` once `shutdown` is set, `true` when the stage should
    /// run a pass. A timeout counts as a request to run.
    pub(crate) fn wait(&self, shutdown: &AtomicBool, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock();
        loop {
            // Checked under the lock: shutdown notifies while holding it,
            // so the flag cannot flip between this check and the wait.
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            if *pending {
                *pending = false;
                return true;
            }
            match timeout {
                Some(timeout) => {
                    if self.ready.wait_for(&mut pending, timeout).timed_out() {
                        *pending = false;
                        return !shutdown.load(Ordering::Acquire);
                    }
                }
                None => self.ready.wait(&mut pending),
            }
        }
    }
}
