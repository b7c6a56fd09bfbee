//! The "%OC" rate-limited logging verb.
//!
//! A log site names a counter and a repeat limit; the first occurrence
//! always logs, and the next `limit - 1` occurrences of that counter are
//! suppressed. The counter then resets, so a persistent condition still
//! produces a log line once per `limit` occurrences rather than going
//! silent forever or flooding the log.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<&'static str, u64>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the caller should log this occurrence of `key`.
    pub fn should_log(&self, key: &'static str, limit: u64) -> bool {
        let limit = limit.max(1);
        let mut counters = self.counters.lock().unwrap();
        let count = counters.entry(key).or_insert(0);
        *count += 1;
        if *count > limit {
            *count = 1;
        }
        *count == 1
    }
}

/// Logs `msg` at `critical` severity (mapped onto [`log::Level::Error`], the
/// most severe level the `log` facade offers) through the named, rate
/// limited counter.
#[macro_export]
macro_rules! critical_oc {
    ($limiter:expr, $counter:expr, $limit:expr, $($arg:tt)+) => {
        if $limiter.should_log($counter, $limit) {
            log::error!($($arg)+);
        }
    };
}

/// Logs `msg` at `warn` severity through the named, rate limited counter.
#[macro_export]
macro_rules! warn_oc {
    ($limiter:expr, $counter:expr, $limit:expr, $($arg:tt)+) => {
        if $limiter.should_log($counter, $limit) {
            log::warn!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_always_logs() {
        let rl = RateLimiter::new();
        assert!(rl.should_log("k", 3));
    }

    #[test]
    fn suppresses_until_window_resets() {
        let rl = RateLimiter::new();
        assert!(rl.should_log("k", 3)); // 1st: log
        assert!(!rl.should_log("k", 3)); // 2nd: suppressed
        assert!(!rl.should_log("k", 3)); // 3rd: suppressed
        assert!(rl.should_log("k", 3)); // 4th: window reset, log again
    }

    #[test]
    fn counters_are_independent() {
        let rl = RateLimiter::new();
        assert!(rl.should_log("a", 2));
        assert!(!rl.should_log("a", 2));
        assert!(rl.should_log("b", 2));
    }
}
