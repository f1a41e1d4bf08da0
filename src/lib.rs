//! # LDT Client
//!
//! Client for **LDT**, a line-delimited text protocol over TCP with a
//! post-connect TLS upgrade. Every frame is UTF-8 text terminated by CR LF:
//!
//! ```text
//! outbound: {route} / {data}\r\n
//! inbound:  {status} / {data}\r\n     (status 100 = unsolicited push)
//! ```
//!
//! The crate provides:
//!
//! - **Framing**: a chunk-boundary independent decoder that reassembles
//!   frames whose payload contains the `" / "` separator and drops malformed
//!   frames without losing their neighbours
//! - **Supervision**: a single logical connection with a reconnect cooldown,
//!   so a flapping server is retried at most once per window
//! - **Fan-out**: lifecycle and message notifications to any number of
//!   subscribers
//!
//! ## Feature Flags
//!
//! - `client` (default): tokio TCP transport, rustls upgrade, async [`LdtClient`]
//!
//! Without `client` only the sans-IO core is built: [`FrameCodec`],
//! [`ConnectionSupervisor`] and the [`Transport`]/[`Scheduler`] traits it is
//! written against.
//!
//! ## Modules
//!
//! - [`core`]: Constants, endpoint, error types and capability traits (always included)
//! - [`transport`]: Codec, supervisor and subscriber registry; tokio plumbing with `client`
//! - [`client`]: Async client handle (requires `client` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use ldt_client::prelude::*;
//!
//! let mut codec = FrameCodec::new();
//!
//! // Chunks may split frames anywhere.
//! assert_eq!(codec.feed(b"200 / ok").count(), 0);
//! let messages: Vec<_> = codec.feed(b"\r\n100 / 52.1 / 13.4\r\n").collect();
//!
//! assert_eq!(messages[0].status_or_route(), 200);
//! assert_eq!(messages[0].body(), "ok");
//! assert!(messages[1].is_push());
//! assert_eq!(messages[1].body(), "52.1 / 13.4");
//!
//! let request = codec.encode("location", "52.1 / 13.4").unwrap();
//! assert_eq!(request, b"location / 52.1 / 13.4\r\n");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Codec, supervisor and fan-out (tokio plumbing gated inside)
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::transport::{
        ConnectionState, ConnectionSupervisor, FrameCodec, ProtocolMessage, Subscriber,
        SupervisorConfig,
    };

    #[cfg(feature = "client")]
    pub use crate::transport::{TcpTransport, TlsMode, TokioScheduler};

    #[cfg(feature = "client")]
    pub use crate::client::*;
}

// Re-export commonly used items at crate root
pub use core::{
    ConnectionError, Endpoint, Scheduler, SerializationError, SupervisorError, Transport,
};

pub use transport::{
    ConnectionState, ConnectionSupervisor, FrameCodec, ProtocolMessage, Subscriber,
};

#[cfg(feature = "client")]
pub use client::{ChannelSubscriber, ClientConfig, ClientError, ClientEvent, LdtClient};
