//! Subscriber registry for lifecycle and message fan-out.

use std::sync::Arc;
use std::time::SystemTime;

use super::frame::ProtocolMessage;
use crate::core::ConnectionError;

/// Receiver of connection lifecycle events and decoded messages.
///
/// Callbacks run on the supervisor's serialization context and must not block.
pub trait Subscriber: Send + Sync {
    /// Connection established (TLS upgrade requested).
    fn on_connected(&self, at: SystemTime);

    /// Connection lost. `error` is `None` for a clean peer close.
    fn on_disconnected(&self, error: Option<&ConnectionError>, at: SystemTime);

    /// One inbound frame decoded.
    fn on_message(&self, message: &ProtocolMessage, at: SystemTime);

    /// Whether this subscriber can no longer receive anything. Closed
    /// subscribers are dropped from the registry.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Set of subscribers keyed by identity (`Arc::ptr_eq`), in insertion order.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.subscribers.len())
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Returns `false` if it was already registered.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) -> bool {
        if self.contains(&subscriber) {
            return false;
        }
        self.subscribers.push(subscriber);
        true
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, subscriber: &Arc<dyn Subscriber>) -> bool {
        match self
            .subscribers
            .iter()
            .position(|s| Arc::ptr_eq(s, subscriber))
        {
            Some(index) => {
                self.subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Check whether this exact subscriber is registered.
    pub fn contains(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        self.subscribers.iter().any(|s| Arc::ptr_eq(s, subscriber))
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Drop subscribers reporting [`Subscriber::is_closed`]. Returns how many
    /// were removed.
    pub fn retain_open(&mut self) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| !s.is_closed());
        before - self.subscribers.len()
    }

    // Callbacks only get `&self`, so the set cannot change mid-dispatch.

    /// Notify everyone of an established connection.
    pub fn notify_connected(&self, at: SystemTime) {
        for subscriber in &self.subscribers {
            subscriber.on_connected(at);
        }
    }

    /// Notify everyone of a lost connection.
    pub fn notify_disconnected(&self, error: Option<&ConnectionError>, at: SystemTime) {
        for subscriber in &self.subscribers {
            subscriber.on_disconnected(error, at);
        }
    }

    /// Deliver one decoded message to everyone.
    pub fn notify_message(&self, message: &ProtocolMessage, at: SystemTime) {
        for subscriber in &self.subscribers {
            subscriber.on_message(message, at);
        }
    }
}
