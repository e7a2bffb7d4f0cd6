//! Wall-clock helpers.
//!
//! The wire protocol and the LWW order both use milliseconds since the
//! Unix epoch. Ties between equal timestamps are broken by vector-clock
//! counters, so a plain millisecond value is enough here.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as u64
}
