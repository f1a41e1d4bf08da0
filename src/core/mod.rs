//! LDT client - Core traits, types, and constants.
//!
//! This module provides the foundational types shared by the codec, the
//! supervisor and the transport. It has minimal dependencies and defines the
//! capability traits the supervisor is written against.

mod constants;
mod endpoint;
mod error;
mod traits;

pub use constants::*;
pub use endpoint::*;
pub use error::*;
pub use traits::*;
