//! Shutdown signalling and running-task accounting for a session.
//!
//! The watch flag stops the session loop and the reconnect supervisor. Each
//! spawned task holds a [`TaskGuard`]; when the last guard drops, anyone
//! waiting in [`ShutdownController::drained`] is woken so the transport can
//! be closed only after their replies were queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};

#[derive(Debug, Default)]
struct Running {
    count: AtomicUsize,
    idle: Notify,
}

/// Latching shutdown flag plus a count of running tasks.
#[derive(Debug)]
pub struct ShutdownController {
    flag: watch::Sender<bool>,
    running: Arc<Running>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: watch::Sender::new(false),
            running: Arc::new(Running::default()),
        }
    }

    /// Receiver that observes `true` once [`trigger`](Self::trigger) ran.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }

    /// Latches the flag. Calling it again is a no-op.
    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    /// Counts one running task until the returned guard drops.
    #[must_use]
    pub fn track_task(&self) -> TaskGuard {
        self.running.count.fetch_add(1, Ordering::AcqRel);
        TaskGuard {
            running: Arc::clone(&self.running),
        }
    }

    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.running.count.load(Ordering::Acquire)
    }

    /// Waits for the running-task count to reach zero.
    ///
    /// Returns `false` if tasks were still running when `timeout` elapsed.
    pub async fn drained(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let idle = self.running.idle.notified();
            tokio::pin!(idle);
            // register before checking so a guard dropped in between still wakes us
            idle.as_mut().enable();

            if self.running_tasks() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return self.running_tasks() == 0;
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one spawned task as running.
#[derive(Debug)]
pub struct TaskGuard {
    running: Arc<Running>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.running.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.running.idle.notify_waiters();
        }
    }
}
