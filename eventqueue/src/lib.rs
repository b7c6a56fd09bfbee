//! Back-pressure event queues and rate-limited logging.
//!
//! Shared by `packetd-core` (reports-sink and bypass signalling) and
//! `packetd-classifier` (plugin-timeout and I/O-error logging).

pub mod queue;
pub mod ratelimit;

pub use queue::{BoundedQueue, QueueStats};
pub use ratelimit::RateLimiter;
