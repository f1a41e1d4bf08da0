//! Error types for the LDT client.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Transport-level failures: connect, TLS upgrade, read or write.
///
/// These never escape the supervisor as errors once a connection attempt is
/// underway; they drive the error-close recovery path and reach subscribers as
/// the detail of a "disconnected" notification. Only a synchronous failure to
/// initiate an attempt is returned to the caller of `start`.
#[derive(Debug, Error, Clone)]
pub enum ConnectionError {
    /// Endpoint is unusable (empty host, port zero, unparsable URL).
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// No async runtime available to drive the attempt.
    #[error("no runtime available to drive the connection")]
    NoRuntime,

    /// Socket I/O failure.
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),

    /// Connect or TLS handshake did not complete in time.
    #[error("connect timed out")]
    Timeout,

    /// Endpoint host is not a valid TLS server name.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// TLS configuration or handshake failure.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// Transport was torn down underneath the connection.
    #[error("connection closed")]
    Closed,
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(Arc::new(err))
    }
}

/// Outbound data that cannot be put on the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// Payload is not valid UTF-8 text.
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// Payload contains the frame delimiter.
    #[error("payload contains the frame delimiter")]
    EmbeddedDelimiter,

    /// Route is empty or contains the field separator or delimiter bytes.
    #[error("invalid route: {0:?}")]
    InvalidRoute(String),
}

/// Errors returned directly to callers of the supervisor.
///
/// Only misuse errors and synchronous connect-initiation failures are
/// reported here; everything else is handled by the state machine.
#[derive(Debug, Error, Clone)]
pub enum SupervisorError {
    /// `send` while not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection attempt could not be initiated.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Outbound data not encodable.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

impl SupervisorError {
    /// Check if this error is caller misuse rather than a transport failure.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            SupervisorError::NotConnected | SupervisorError::Serialization(_)
        )
    }
}

/// Result type for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;
