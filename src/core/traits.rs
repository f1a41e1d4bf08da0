//! Capabilities the connection supervisor calls into.
//!
//! The supervisor is sans-IO: it never touches a socket or a clock directly.
//! A driver supplies a [`Transport`] and a [`Scheduler`] and feeds their
//! completions back as events on the same serialization context.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::endpoint::Endpoint;
use super::error::ConnectionError;

/// Identifier of one connection attempt.
///
/// Every transport event carries the attempt it belongs to so the supervisor
/// can ignore events from attempts it has already abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AttemptId(u64);

impl AttemptId {
    /// Create an attempt id from a raw counter value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of an armed cooldown timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Create a timer id from a raw counter value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Options for the post-connect TLS upgrade.
///
/// The default is empty: verify against the bundled web PKI roots using the
/// endpoint host as server name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Name to verify instead of the endpoint host.
    pub server_name: Option<String>,
    /// PEM bundle with extra trust anchors.
    pub ca_file: Option<PathBuf>,
}

/// Event produced by a [`Transport`] and delivered to the supervisor.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// TCP connect completed.
    Connected {
        /// Attempt that connected.
        attempt: AttemptId,
    },
    /// A chunk of inbound bytes.
    Bytes {
        /// Attempt the bytes were read on.
        attempt: AttemptId,
        /// Raw bytes, not necessarily frame-aligned.
        chunk: bytes::Bytes,
    },
    /// Connection closed, either cleanly (`None`) or with an error.
    ///
    /// Also reported when the connect itself fails.
    Closed {
        /// Attempt that closed.
        attempt: AttemptId,
        /// Failure detail; `None` for a clean peer close or a requested disconnect.
        error: Option<ConnectionError>,
    },
}

impl TransportEvent {
    /// Attempt this event belongs to.
    pub fn attempt(&self) -> AttemptId {
        match self {
            TransportEvent::Connected { attempt }
            | TransportEvent::Bytes { attempt, .. }
            | TransportEvent::Closed { attempt, .. } => *attempt,
        }
    }
}

/// Socket primitive the supervisor drives.
///
/// All methods return immediately; completions arrive later as
/// [`TransportEvent`]s tagged with the attempt passed to [`Transport::connect`].
pub trait Transport {
    /// Begin connecting, replacing any previous connection.
    ///
    /// An error means the attempt could not even be initiated; no event will
    /// follow for it.
    fn connect(&mut self, attempt: AttemptId, endpoint: &Endpoint) -> Result<(), ConnectionError>;

    /// Upgrade the current connection to TLS. Failures surface as a
    /// `Closed` event with an error.
    fn start_tls(&mut self, options: &TlsOptions);

    /// Queue bytes for writing. Fire-and-forget.
    fn write(&mut self, bytes: Vec<u8>);

    /// Arm the next read; one `Bytes` event follows per call.
    fn read_until(&mut self, delimiter: &'static [u8]);

    /// Close the current connection. A `Closed` event follows if one was open.
    fn disconnect(&mut self);
}

/// Deferred-task capability used for the reconnect cooldown.
///
/// Firings are delivered back to the supervisor by the driver through
/// `on_cooldown_elapsed`, on the same context as transport events.
pub trait Scheduler {
    /// Arm a one-shot timer.
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Cancel a timer. Cancelling an unknown or fired timer is a no-op.
    fn cancel(&mut self, id: TimerId);
}
