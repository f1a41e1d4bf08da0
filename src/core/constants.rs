//! Protocol constants for the LDT wire format.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// FRAMING
// =============================================================================

/// Frame terminator (CR LF). Never valid inside a frame's data segment.
pub const DELIMITER: &[u8] = b"\r\n";

/// Field separator between the status/route field and the data payload.
///
/// May legitimately recur inside the payload.
pub const FIELD_SEPARATOR: &str = " / ";

/// Reserved status for unsolicited pushes (not a reply to any request).
pub const STATUS_PUSH: u16 = 100;

/// Default cap on bytes buffered while waiting for a delimiter (1 MiB).
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 1024 * 1024;

// =============================================================================
// CONNECTION LIFECYCLE
// =============================================================================

/// Cooldown between automatic connection attempts.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Upper bound on a single TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Size of a single socket read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;
