//! LDT client - Async client
//!
//! High-level tokio API over the connection supervisor.

mod bootstrap;
#[allow(clippy::module_inception)]
mod client;
mod events;

pub use bootstrap::*;
pub use client::*;
pub use events::*;
