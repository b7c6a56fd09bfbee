//! Optional asynchronous upload of terminal classification results.
//!
//! Disabled by configuration by default. When enabled, reports are queued
//! through a bounded, drop-on-overflow queue so a slow or unreachable
//! upload endpoint never backs up packet processing.

use std::sync::Arc;

use packetd_eventqueue::{BoundedQueue, RateLimiter};

#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub session_id: u64,
    pub application_guid: Option<String>,
    pub confidence: u32,
}

const REPORT_QUEUE_CAPACITY: usize = 1000;

pub struct CloudReporter {
    queue: BoundedQueue<ClassificationReport>,
    limiter: Arc<RateLimiter>,
}

impl CloudReporter {
    pub fn new() -> Self {
        CloudReporter {
            queue: BoundedQueue::new(REPORT_QUEUE_CAPACITY, "cloud_report_drop"),
            limiter: Arc::new(RateLimiter::new()),
        }
    }

    /// Enqueues a report for asynchronous upload. Drops silently (with a
    /// rate-limited warning) if the queue is full.
    pub fn enqueue(&self, session_id: u64, application_guid: Option<String>, confidence: u32) {
        self.queue.push(
            ClassificationReport {
                session_id,
                application_guid,
                confidence,
            },
            &self.limiter,
        );
    }

    /// Drains queued reports and "uploads" them via `upload`, stopping as
    /// soon as `shutdown` resolves. A report already in flight to `upload`
    /// is allowed to finish; no new report is picked up afterwards.
    pub async fn run(&self, mut upload: impl FnMut(ClassificationReport), shutdown: impl std::future::Future<Output = ()>) {
        let receiver = self.queue.receiver();
        tokio::pin!(shutdown);
        loop {
            let receiver = receiver.clone();
            tokio::select! {
                report = tokio::task::spawn_blocking(move || receiver.recv()) => {
                    match report {
                        Ok(Ok(report)) => upload(report),
                        _ => break,
                    }
                }
                _ = &mut shutdown => break,
            }
        }
    }
}

impl Default for CloudReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueued_reports_are_delivered_in_order() {
        let reporter = CloudReporter::new();
        reporter.enqueue(1, Some("0x1a".to_string()), 90);
        reporter.enqueue(2, None, 10);

        let mut seen = Vec::new();
        let receiver = reporter.queue.receiver();
        seen.push(receiver.recv().unwrap().session_id);
        seen.push(receiver.recv().unwrap().session_id);
        assert_eq!(seen, vec![1, 2]);
    }
}
