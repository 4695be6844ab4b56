//! Shared utilities.
//!
//! Content hashing primitives, clock helpers and test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, saturating at zero for clocks set before it.
pub fn now_unix_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or_default()
}
