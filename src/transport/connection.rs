//! Connection lifecycle state and the reconnect gate.

use std::fmt;
use std::time::Duration;

use crate::core::{Scheduler, TimerId};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no attempt outstanding.
    #[default]
    Disconnected,
    /// Connect requested, not yet established.
    Connecting,
    /// Established; inbound reads armed, outbound writes allowed.
    Connected,
}

impl ConnectionState {
    /// Check if the state allows sending.
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Rate limiter for connection attempts.
///
/// At most one cooldown timer is pending at any time. `can_retry` is cleared
/// when an attempt starts and set again when the attempt connects, when the
/// connection ends without error, or when the cooldown elapses.
#[derive(Debug)]
pub struct RetryGate {
    can_retry: bool,
    pending: Option<TimerId>,
}

impl Default for RetryGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryGate {
    /// Create an open gate with no timer.
    pub fn new() -> Self {
        Self {
            can_retry: true,
            pending: None,
        }
    }

    /// Whether a new attempt may start now.
    pub fn can_retry(&self) -> bool {
        self.can_retry
    }

    /// Currently armed cooldown, if any.
    pub fn pending(&self) -> Option<TimerId> {
        self.pending
    }

    /// Open the gate without touching the timer.
    pub fn open(&mut self) {
        self.can_retry = true;
    }

    /// Close the gate and (re)arm the cooldown, replacing any pending timer.
    pub fn close_and_arm<S: Scheduler>(&mut self, scheduler: &mut S, cooldown: Duration) {
        self.can_retry = false;
        self.cancel(scheduler);
        self.pending = Some(scheduler.schedule(cooldown));
    }

    /// Cancel the pending timer, if any.
    pub fn cancel<S: Scheduler>(&mut self, scheduler: &mut S) {
        if let Some(id) = self.pending.take() {
            scheduler.cancel(id);
        }
    }

    /// Handle a timer firing.
    ///
    /// Returns `true` and opens the gate if `id` is the pending timer;
    /// returns `false` for a timer that was already cancelled or replaced.
    pub fn on_elapsed<S: Scheduler>(&mut self, scheduler: &mut S, id: TimerId) -> bool {
        if self.pending != Some(id) {
            return false;
        }
        self.pending = None;
        // Releases whatever the scheduler still holds for a fired timer.
        scheduler.cancel(id);
        self.can_retry = true;
        true
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ManualScheduler;
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(10);

    #[test]
    fn test_state_default_and_display() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(!state.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }

    #[test]
    fn test_gate_starts_open() {
        let gate = RetryGate::new();
        assert!(gate.can_retry());
        assert!(gate.pending().is_none());
    }

    #[test]
    fn test_gate_keeps_single_timer() {
        let mut scheduler = ManualScheduler::default();
        let mut gate = RetryGate::new();

        gate.close_and_arm(&mut scheduler, COOLDOWN);
        let first = gate.pending().unwrap();
        gate.close_and_arm(&mut scheduler, COOLDOWN);
        let second = gate.pending().unwrap();

        assert_ne!(first, second);
        assert!(!gate.can_retry());
        assert_eq!(scheduler.armed.len(), 1);
        assert_eq!(scheduler.cancelled, vec![first]);
    }

    #[test]
    fn test_gate_elapsed_opens() {
        let mut scheduler = ManualScheduler::default();
        let mut gate = RetryGate::new();

        gate.close_and_arm(&mut scheduler, COOLDOWN);
        let id = gate.pending().unwrap();
        assert!(gate.on_elapsed(&mut scheduler, id));
        assert!(gate.can_retry());
        assert!(gate.pending().is_none());
        assert!(scheduler.armed.is_empty());
    }

    #[test]
    fn test_gate_ignores_stale_timer() {
        let mut scheduler = ManualScheduler::default();
        let mut gate = RetryGate::new();

        gate.close_and_arm(&mut scheduler, COOLDOWN);
        let stale = gate.pending().unwrap();
        gate.cancel(&mut scheduler);

        assert!(!gate.on_elapsed(&mut scheduler, stale));
        assert!(!gate.can_retry());
    }
}
