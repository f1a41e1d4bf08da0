//! Cooldown timers on the tokio runtime.
//!
//! Each armed timer is a spawned `sleep` task that reports its [`TimerId`] on
//! a channel when it elapses. The receiving side belongs to whoever drives the
//! supervisor, so a firing is handled on the same context as every other
//! event. Cancelling aborts the task; a firing that raced the cancel is
//! rejected by the retry gate because its id is no longer pending.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::{Scheduler, TimerId};

/// [`Scheduler`] backed by `tokio::time::sleep`.
///
/// Must be used from within a tokio runtime.
#[derive(Debug)]
pub struct TokioScheduler {
    fired: mpsc::UnboundedSender<TimerId>,
    next: u64,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    /// Create a scheduler reporting elapsed timers on `fired`.
    pub fn new(fired: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            fired,
            next: 0,
            timers: HashMap::new(),
        }
    }

    /// Create a scheduler together with the receiver of its firings.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimerId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Number of timers not yet cancelled.
    pub fn armed(&self) -> usize {
        self.timers.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.next += 1;
        let id = TimerId::new(self.next);
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the driver has shut down.
            let _ = fired.send(id);
        });
        self.timers.insert(id, task);
        tracing::trace!(timer = id.get(), ?delay, "cooldown armed");
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.timers.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }
}
