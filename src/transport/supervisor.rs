//! Connection supervisor: reconnect state machine and event fan-out.
//!
//! The supervisor is sans-IO. It drives a [`Transport`] and a [`Scheduler`]
//! and is fed their completions through [`ConnectionSupervisor::handle_event`]
//! and [`ConnectionSupervisor::on_cooldown_elapsed`]. Every call must come
//! from one serialization context; nothing here locks.
//!
//! ```text
//!              start                 connected
//! Disconnected ─────▶ Connecting ───────────────▶ Connected
//!      ▲   ▲              │  ▲ cooldown elapsed       │
//!      │   │   closed(err)│  └── (stalled attempt)    │ closed / stop
//!      │   └──────────────┘                           │
//!      └──────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::connection::{ConnectionState, RetryGate};
use super::frame::{self, FrameCodec};
use super::registry::{Subscriber, SubscriberRegistry};
use crate::core::{
    AttemptId, ConnectionError, DEFAULT_COOLDOWN, DEFAULT_MAX_BUFFERED_BYTES, DELIMITER, Endpoint,
    Scheduler, SupervisorError, SupervisorResult, TimerId, TlsOptions, Transport, TransportEvent,
};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Minimum spacing between automatic connection attempts.
    pub cooldown: Duration,
    /// Options passed to the post-connect TLS upgrade.
    pub tls: TlsOptions,
    /// Inbound buffering limit while waiting for a frame boundary.
    pub max_buffered_bytes: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            tls: TlsOptions::default(),
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
        }
    }
}

/// Owns the transport, the cooldown timer and the codec for one logical
/// connection, and republishes what happens on it to subscribers.
#[derive(Debug)]
pub struct ConnectionSupervisor<T, S> {
    config: SupervisorConfig,
    transport: T,
    scheduler: S,
    codec: FrameCodec,
    state: ConnectionState,
    gate: RetryGate,
    subscribers: SubscriberRegistry,
    /// Last endpoint passed to `start`, replayed by retries.
    endpoint: Option<Endpoint>,
    attempt: AttemptId,
    /// Set by `stop` so the close it causes is not reported.
    voluntary_close: bool,
}

impl<T: Transport, S: Scheduler> ConnectionSupervisor<T, S> {
    /// Create a disconnected supervisor.
    pub fn new(config: SupervisorConfig, transport: T, scheduler: S) -> Self {
        let codec = FrameCodec::with_max_buffered(config.max_buffered_bytes);
        Self {
            config,
            transport,
            scheduler,
            codec,
            state: ConnectionState::Disconnected,
            gate: RetryGate::new(),
            subscribers: SubscriberRegistry::new(),
            endpoint: None,
            attempt: AttemptId::default(),
            voluntary_close: false,
        }
    }

    /// Start connecting to `endpoint`.
    ///
    /// The endpoint is cached even when the call is a no-op. No-op while
    /// connected or while the retry gate is closed (an attempt is outstanding
    /// or the cooldown has not elapsed). Once the gate has reopened, an
    /// attempt still stuck in `Connecting` is abandoned and replaced.
    ///
    /// A failure to initiate the attempt is returned, leaving the state
    /// `Connecting` with the cooldown armed so the timer retries it.
    pub fn start(&mut self, endpoint: Endpoint) -> SupervisorResult<()> {
        self.endpoint = Some(endpoint.clone());

        if self.state == ConnectionState::Connected {
            tracing::debug!(%endpoint, "start ignored: already connected");
            return Ok(());
        }
        if !self.gate.can_retry() {
            tracing::debug!(%endpoint, "start ignored: retry gate closed");
            return Ok(());
        }
        if self.state == ConnectionState::Connecting {
            tracing::warn!(attempt = %self.attempt, "abandoning stalled connection attempt");
            self.transport.disconnect();
        }

        self.attempt = self.attempt.next();
        self.voluntary_close = false;
        self.codec.reset();
        self.state = ConnectionState::Connecting;
        self.gate
            .close_and_arm(&mut self.scheduler, self.config.cooldown);

        tracing::info!(%endpoint, attempt = %self.attempt, "connecting");
        if let Err(err) = self.transport.connect(self.attempt, &endpoint) {
            tracing::warn!(%endpoint, error = %err, "failed to initiate connection");
            return Err(SupervisorError::Connection(err));
        }
        Ok(())
    }

    /// Reopen the retry gate and replay `start` with the cached endpoint.
    pub fn reset_retry(&mut self) -> SupervisorResult<()> {
        self.gate.open();
        match self.endpoint.clone() {
            Some(endpoint) => self.start(endpoint),
            None => {
                tracing::debug!("reset_retry ignored: no endpoint requested yet");
                Ok(())
            }
        }
    }

    /// Tear down the connection without notifying subscribers.
    ///
    /// Cancels the cooldown and leaves the gate open, so a later `start`
    /// connects immediately.
    pub fn stop(&mut self) {
        self.gate.cancel(&mut self.scheduler);
        self.gate.open();

        if self.state != ConnectionState::Disconnected {
            tracing::info!(attempt = %self.attempt, "stopping connection");
            self.voluntary_close = true;
        }
        self.transport.disconnect();
        self.codec.reset();
        self.state = ConnectionState::Disconnected;
    }

    /// Send pre-formatted frame text (the delimiter is appended).
    pub fn send(&mut self, text: &str) -> SupervisorResult<()> {
        if !self.state.is_connected() {
            return Err(SupervisorError::NotConnected);
        }
        let bytes = frame::encode_line(text)?;
        tracing::trace!(len = bytes.len(), "writing frame");
        self.transport.write(bytes);
        Ok(())
    }

    /// Send a `{route} / {data}` request frame.
    pub fn send_request(&mut self, route: &str, data: &str) -> SupervisorResult<()> {
        if !self.state.is_connected() {
            return Err(SupervisorError::NotConnected);
        }
        let bytes = self.codec.encode(route, data)?;
        tracing::trace!(route, len = bytes.len(), "writing request");
        self.transport.write(bytes);
        Ok(())
    }

    /// Register a subscriber. Registering twice is a no-op.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.prune_subscribers();
        if !self.subscribers.subscribe(subscriber) {
            tracing::debug!("subscriber already registered");
        }
    }

    /// Remove a subscriber. Removing an unknown subscriber is a no-op.
    pub fn unsubscribe(&mut self, subscriber: &Arc<dyn Subscriber>) {
        if !self.subscribers.unsubscribe(subscriber) {
            tracing::debug!("unsubscribe ignored: subscriber not registered");
        }
    }

    /// Drop subscribers that can no longer receive. Returns how many went.
    pub fn prune_subscribers(&mut self) -> usize {
        let pruned = self.subscribers.retain_open();
        if pruned > 0 {
            tracing::debug!(pruned, "dropped closed subscribers");
        }
        pruned
    }

    /// Dispatch a transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        let attempt = event.attempt();
        if attempt != self.attempt {
            tracing::debug!(%attempt, current = %self.attempt, "ignoring event from stale attempt");
            return;
        }
        match event {
            TransportEvent::Connected { .. } => self.on_connected(),
            TransportEvent::Bytes { chunk, .. } => self.on_bytes(&chunk),
            TransportEvent::Closed { error, .. } => self.on_closed(error),
        }
    }

    /// Handle a cooldown timer firing: reopen the gate and retry.
    pub fn on_cooldown_elapsed(&mut self, id: TimerId) {
        if !self.gate.on_elapsed(&mut self.scheduler, id) {
            tracing::debug!(timer = id.get(), "ignoring cancelled cooldown");
            return;
        }
        tracing::debug!("cooldown elapsed");
        if let Err(err) = self.reset_retry() {
            tracing::warn!(error = %err, "retry after cooldown failed to start");
        }
    }

    fn on_connected(&mut self) {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = %self.state, "ignoring connect in unexpected state");
            return;
        }
        self.gate.cancel(&mut self.scheduler);
        self.gate.open();

        self.transport.start_tls(&self.config.tls);
        self.state = ConnectionState::Connected;
        tracing::info!(attempt = %self.attempt, endpoint = ?self.endpoint, "connected");
        self.prune_subscribers();
        self.subscribers.notify_connected(SystemTime::now());

        self.transport.read_until(DELIMITER);
    }

    fn on_bytes(&mut self, chunk: &[u8]) {
        if self.state != ConnectionState::Connected {
            tracing::debug!(state = %self.state, "ignoring bytes in unexpected state");
            return;
        }
        tracing::trace!(len = chunk.len(), "bytes received");
        self.prune_subscribers();
        for message in self.codec.feed(chunk) {
            tracing::debug!(status = message.status_or_route(), "message received");
            self.subscribers.notify_message(&message, SystemTime::now());
        }
        self.transport.read_until(DELIMITER);
    }

    fn on_closed(&mut self, error: Option<ConnectionError>) {
        if self.voluntary_close {
            self.voluntary_close = false;
            self.state = ConnectionState::Disconnected;
            tracing::debug!("voluntary close completed");
            return;
        }
        if self.state == ConnectionState::Disconnected {
            tracing::debug!("ignoring close while disconnected");
            return;
        }

        self.state = ConnectionState::Disconnected;
        self.codec.reset();
        self.prune_subscribers();
        match error {
            None => {
                self.gate.cancel(&mut self.scheduler);
                self.gate.open();
                tracing::info!(attempt = %self.attempt, "connection closed by peer");
                self.subscribers
                    .notify_disconnected(None, SystemTime::now());
            }
            Some(err) => {
                self.gate
                    .close_and_arm(&mut self.scheduler, self.config.cooldown);
                tracing::warn!(attempt = %self.attempt, error = %err, "connection lost, retrying after cooldown");
                self.subscribers
                    .notify_disconnected(Some(&err), SystemTime::now());
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Whether a new attempt may start now.
    pub fn can_retry(&self) -> bool {
        self.gate.can_retry()
    }

    /// Currently armed cooldown, if any.
    pub fn pending_cooldown(&self) -> Option<TimerId> {
        self.gate.pending()
    }

    /// Endpoint of the last `start` call.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Attempt of the current (or last) connection.
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Get the supervisor configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a reference to the scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}
