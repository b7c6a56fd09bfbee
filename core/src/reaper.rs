//! The periodic sweep that evicts stale sessions and conntracks.

use std::sync::Arc;
use std::time::Duration;

use crate::time::now_millis;
use crate::Dispatcher;

pub const REAP_INTERVAL: Duration = Duration::from_secs(60);
pub const SESSION_STALE_AFTER: Duration = Duration::from_secs(10_000);
pub const CONNTRACK_STALE_AFTER: Duration = Duration::from_secs(1_800);

impl Dispatcher {
    /// Runs one reap pass, removing sessions idle more than
    /// [`SESSION_STALE_AFTER`] and conntracks idle more than
    /// [`CONNTRACK_STALE_AFTER`].
    pub fn reap_once(&self) {
        let now = now_millis();

        let stale_sessions = self
            .sessions
            .reap(|s| now.saturating_sub(s.last_activity_millis()) > SESSION_STALE_AFTER.as_millis() as u64);
        for session in &stale_sessions {
            self.conntracks.remove(&session.conntrack_id);
        }
        if !stale_sessions.is_empty() {
            log::info!("reaper evicted {} stale session(s)", stale_sessions.len());
        }

        let stale_conntracks = self.conntracks.reap(|c| {
            now.saturating_sub(c.last_activity_millis()) > CONNTRACK_STALE_AFTER.as_millis() as u64
        });
        if !stale_conntracks.is_empty() {
            log::info!("reaper evicted {} stale conntrack(s)", stale_conntracks.len());
        }
    }

    /// Spawns a background task that calls [`Dispatcher::reap_once`] every
    /// [`REAP_INTERVAL`] until the returned handle is dropped or aborted.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            loop {
                ticker.tick().await;
                dispatcher.reap_once();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelShim, ReportsSink, SessionDictionary};
    use crate::packet::Family;
    use crate::session::Session;
    use crate::tuple::Tuple;
    use packetd_types::AttachmentValue;

    struct NoopKernel;
    impl KernelShim for NoopKernel {
        fn bypass_via_nft_set(&self, _ctid: u32, _timeout_ms: u32) {}
    }
    struct NoopDict;
    impl SessionDictionary for NoopDict {
        fn add_session_entry(&self, _ctid: u32, _key: &str, _value: AttachmentValue) {}
        fn delete_session(&self, _ctid: u32) {}
    }
    struct NoopReports;
    impl ReportsSink for NoopReports {
        fn log_event(&self, _event: crate::kernel::Event) {}
    }

    #[test]
    fn reap_once_removes_only_sessions_past_the_staleness_threshold() {
        let dispatcher = Dispatcher::new(0, Arc::new(NoopKernel), Arc::new(NoopDict), Arc::new(NoopReports));
        let tuple = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
        let fresh = Arc::new(Session::new(1, 1, tuple, Family::V4, 10, vec![]));
        dispatcher.sessions.insert(1, fresh, "session");

        dispatcher.reap_once();
        assert!(dispatcher.sessions.find(&1).is_some(), "a fresh session must survive a reap pass");
    }
}
