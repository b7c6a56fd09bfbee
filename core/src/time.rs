//! Wall-clock helpers shared by session and conntrack accounting.
//!
//! Timestamps are stored as milliseconds since the Unix epoch so they fit
//! in a single `AtomicU64` and can be updated without a lock.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

pub fn now_unix_secs() -> u64 {
    now_millis() / 1000
}
