//! Wall-clock access.
//!
//! Every core operation takes an explicit `now: Timestamp` so tests can
//! drive intervals, timeouts, and grace periods deterministically.
//! Production callers get `now` from here.

use crate::types::Timestamp;

/// Current unix time in seconds, UTC.
pub fn now_ts() -> Timestamp {
    chrono::Utc::now().timestamp()
}
