//! Bounded, drop-on-overflow event queues.
//!
//! Mirrors the shape of a channel dispatcher: a bounded `crossbeam` channel
//! plus atomic counters for what made it through and what was dropped. An
//! overflowing queue never blocks its producer; it logs through the
//! rate-limited "%OC" verb instead of flooding on every drop.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::ratelimit::RateLimiter;
use crate::warn_oc;

/// Counts of items accepted and dropped by a [`BoundedQueue`].
#[derive(Default)]
pub struct QueueStats {
    pub enqueued: AtomicU64,
    pub dropped: AtomicU64,
}

impl QueueStats {
    fn new() -> Self {
        Self::default()
    }
}

/// A bounded, non-blocking event queue.
///
/// `drop_counter_key` names the rate-limited counter used when logging
/// overflow, so repeated drops on the same queue collapse into one line per
/// window rather than one per event.
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    stats: QueueStats,
    drop_counter_key: &'static str,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, drop_counter_key: &'static str) -> Self {
        let (tx, rx) = bounded(capacity);
        BoundedQueue {
            tx,
            rx,
            stats: QueueStats::new(),
            drop_counter_key,
        }
    }

    /// Attempts to enqueue `item`. Never blocks. On overflow or a
    /// disconnected receiver, the item is dropped and a rate-limited
    /// warning is logged.
    pub fn push(&self, item: T, limiter: &RateLimiter) {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn_oc!(
                    limiter,
                    self.drop_counter_key,
                    10,
                    "event queue '{}' overflowed, dropping events (total dropped: {})",
                    self.drop_counter_key,
                    self.stats.dropped.load(Ordering::Relaxed)
                );
            }
        }
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_without_blocking() {
        let q = BoundedQueue::new(2, "test_queue");
        let limiter = RateLimiter::new();
        q.push(1, &limiter);
        q.push(2, &limiter);
        q.push(3, &limiter); // over capacity, dropped
        assert_eq!(q.stats().enqueued.load(Ordering::Relaxed), 2);
        assert_eq!(q.stats().dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn accepted_items_are_received_in_order() {
        let q = BoundedQueue::new(4, "test_queue_2");
        let limiter = RateLimiter::new();
        q.push("a", &limiter);
        q.push("b", &limiter);
        let rx = q.receiver();
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert_eq!(rx.try_recv().unwrap(), "b");
    }
}
