//! Small time helpers shared across the pipeline (ported verbatim from `flux::time`).

use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock is set before the unix epoch")
        .as_secs()
}
