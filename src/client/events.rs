//! Channel-backed subscriber for async consumers.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::core::ConnectionError;
use crate::transport::{ProtocolMessage, Subscriber};

/// Lifecycle event or message, as delivered by [`ChannelSubscriber`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established.
    Connected {
        /// When the supervisor saw the connect.
        at: SystemTime,
    },
    /// Connection lost; `error` is `None` for a clean close.
    Disconnected {
        /// Failure detail.
        error: Option<ConnectionError>,
        /// When the supervisor saw the close.
        at: SystemTime,
    },
    /// One decoded inbound frame.
    Message {
        /// The decoded frame.
        message: ProtocolMessage,
        /// When the frame was decoded.
        at: SystemTime,
    },
}

impl ClientEvent {
    /// Timestamp attached to the event.
    pub fn at(&self) -> SystemTime {
        match self {
            ClientEvent::Connected { at }
            | ClientEvent::Disconnected { at, .. }
            | ClientEvent::Message { at, .. } => *at,
        }
    }

    /// The message, if this is one.
    pub fn message(&self) -> Option<&ProtocolMessage> {
        match self {
            ClientEvent::Message { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// [`Subscriber`] that forwards every callback into an unbounded channel.
///
/// Callbacks never block. Events are dropped once the receiver is gone.
#[derive(Debug)]
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiver its events go to.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_connected(&self, at: SystemTime) {
        self.forward(ClientEvent::Connected { at });
    }

    fn on_disconnected(&self, error: Option<&ConnectionError>, at: SystemTime) {
        self.forward(ClientEvent::Disconnected {
            error: error.cloned(),
            at,
        });
    }

    fn on_message(&self, message: &ProtocolMessage, at: SystemTime) {
        self.forward(ClientEvent::Message {
            message: message.clone(),
            at,
        });
    }
    /// The receiver has been dropped.
    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::decode_frame;

    #[test]
    fn test_forwards_in_order() {
        let (subscriber, mut rx) = ChannelSubscriber::channel();
        let now = SystemTime::now();
        let message = decode_frame(b"100 / tick\r\n").unwrap();

        subscriber.on_connected(now);
        subscriber.on_message(&message, now);
        subscriber.on_disconnected(Some(&ConnectionError::Closed), now);

        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Connected { .. })));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.message().map(|m| m.body()), Some("tick"));
        assert_eq!(event.at(), now);
        assert!(matches!(
            rx.try_recv(),
            Ok(ClientEvent::Disconnected {
                error: Some(ConnectionError::Closed),
                ..
            })
        ));
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (subscriber, rx) = ChannelSubscriber::channel();
        drop(rx);
        assert!(subscriber.is_closed());
        subscriber.on_connected(SystemTime::now());
    }
}
