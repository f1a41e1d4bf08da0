//! LDT client - Transport layer
//!
//! This module turns a byte stream into protocol messages and keeps a single
//! logical connection alive. It provides:
//!
//! - **Framing**: [`FrameCodec`] reassembles CR LF delimited frames across
//!   arbitrary chunk boundaries and encodes outbound requests
//! - **Connection state**: [`ConnectionState`] and the [`RetryGate`] cooldown
//! - **Fan-out**: [`SubscriberRegistry`] and the [`Subscriber`] callbacks
//! - **Supervision**: [`ConnectionSupervisor`], the sans-IO reconnect state
//!   machine
//! - **Tokio plumbing** (`client` feature): [`TcpTransport`] with rustls
//!   upgrade and [`TokioScheduler`] cooldown timers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        LdtClient (driver task)          │
//! ├─────────────────────────────────────────┤
//! │        ConnectionSupervisor             │  ← This module
//! │  codec, retry gate, subscribers         │
//! ├───────────────────┬─────────────────────┤
//! │   TcpTransport    │   TokioScheduler    │
//! ├───────────────────┴─────────────────────┤
//! │           TCP (+ TLS)                   │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod frame;
mod registry;
#[cfg(feature = "client")]
mod socket;
mod supervisor;
#[cfg(feature = "client")]
mod timing;

pub use connection::*;
pub use frame::*;
pub use registry::{Subscriber, SubscriberRegistry};
#[cfg(feature = "client")]
pub use socket::{TcpTransport, TlsMode, TransportConfig};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
#[cfg(feature = "client")]
pub use timing::TokioScheduler;
