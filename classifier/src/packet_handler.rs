//! The nfqueue-facing half of the classifier: frames each packet for the
//! DPI engine, applies the reply to the session, and decides release.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use packetd_core::kernel::{Event, ReportsSink, SessionDictionary};
use packetd_core::packet::{Family, ParsedPacket};
use packetd_core::registry::{HandlerOutcome, NfqueueHandler};
use packetd_core::session::{AttachmentChange, Session};
use packetd_types::{ApplicationTable, AttachmentValue};

use crate::cloud_reporter::CloudReporter;
use crate::config::{
    ClassifierConfig, BYTE_COUNT_RELEASE_CEILING, PACKET_COUNT_RELEASE_CEILING,
    POST_CLASSIFICATION_PACKET_LIMIT,
};
use crate::socket_manager::SocketManager;
use crate::wire;

pub const SUBSCRIBER_OWNER: &str = "classify";

pub struct ClassifierSubscriber {
    pub(crate) socket: Arc<SocketManager>,
    applications: Arc<ApplicationTable>,
    session_dict: Arc<dyn SessionDictionary>,
    reports: Arc<dyn ReportsSink>,
    cloud_reporter: Option<Arc<CloudReporter>>,
    post_classification_counts: Mutex<HashMap<u64, AtomicU32>>,
}

impl ClassifierSubscriber {
    pub fn new(
        socket: Arc<SocketManager>,
        applications: Arc<ApplicationTable>,
        session_dict: Arc<dyn SessionDictionary>,
        reports: Arc<dyn ReportsSink>,
        cloud_reporter: Option<Arc<CloudReporter>>,
    ) -> Self {
        ClassifierSubscriber {
            socket,
            applications,
            session_dict,
            reports,
            cloud_reporter,
            post_classification_counts: Mutex::new(HashMap::new()),
        }
    }

    fn bump_post_classification_count(&self, session_id: u64) -> u32 {
        let mut guard = self.post_classification_counts.lock().unwrap();
        let counter = guard.entry(session_id).or_insert_with(|| AtomicU32::new(0));
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn apply_attachment(
        &self,
        session: &Session,
        ctid: u32,
        key: &str,
        value: AttachmentValue,
        modified: &mut Vec<String>,
        columns: &mut Vec<(String, AttachmentValue)>,
    ) {
        match session.attach(key, value.clone()) {
            AttachmentChange::Inserted | AttachmentChange::Updated => {
                self.session_dict.add_session_entry(ctid, key, value.clone());
                modified.push(key.to_string());
                columns.push((key.to_string(), value));
            }
            AttachmentChange::Unchanged | AttachmentChange::SkippedEmpty => {}
        }
    }
}

#[async_trait]
impl NfqueueHandler for ClassifierSubscriber {
    async fn handle_packet(
        &self,
        session: &Arc<Session>,
        packet: &ParsedPacket<'_>,
        client_to_server: bool,
    ) -> HandlerOutcome {
        // Reorient a copy to canonical client-side addressing so the engine
        // always sees the same direction regardless of which way this
        // particular packet travelled; other subscribers see the original.
        let oriented = packet.client_oriented_copy(client_to_server);
        let family_label = match packet.family {
            Family::V4 => "IP4",
            Family::V6 => "IP6",
        };
        let header = wire::packet_header(session.session_id, family_label, oriented.len());

        let reply = match self.socket.classify_packet(&header, &oriented).await {
            Ok(raw) => wire::parse_reply(&raw),
            Err(e) => {
                log::error!("classifier socket error for session {}: {e}", session.session_id);
                return HandlerOutcome { release: true };
            }
        };

        let prior_confidence = match session.attachment("application_confidence") {
            Some(AttachmentValue::Unsigned(n)) => n as u32,
            _ => 0,
        };
        if reply.confidence < prior_confidence {
            log::debug!("session {}: ignoring confidence regression ({} < {})", session.session_id, reply.confidence, prior_confidence);
        } else {
            let mut modified = Vec::new();
            let mut columns = Vec::new();

            if let Some(guid) = &reply.application_guid {
                if let Some(app) = self.applications.lookup(guid) {
                    self.apply_attachment(session, session.conntrack_id, "application_name", AttachmentValue::from(app.name.clone()), &mut modified, &mut columns);
                    self.apply_attachment(session, session.conntrack_id, "application_category", AttachmentValue::from(app.category.clone()), &mut modified, &mut columns);
                    self.apply_attachment(session, session.conntrack_id, "application_productivity", AttachmentValue::from(app.productivity as u64), &mut modified, &mut columns);
                    self.apply_attachment(session, session.conntrack_id, "application_risk", AttachmentValue::from(app.risk as u64), &mut modified, &mut columns);
                }
            }
            self.apply_attachment(session, session.conntrack_id, "application_confidence", AttachmentValue::from(reply.confidence as u64), &mut modified, &mut columns);

            let application_changed = modified.iter().any(|k| k == "application_name" || k == "application_confidence");

            if !modified.is_empty() {
                self.reports.log_event(Event::session_classify(session.session_id, columns, modified));
            }

            if reply.state.is_terminal() && application_changed {
                if let Some(reporter) = &self.cloud_reporter {
                    reporter.enqueue(session.session_id, reply.application_guid.clone(), reply.confidence);
                }
            }
        }

        let release = if reply.state.is_terminal() {
            let count = self.bump_post_classification_count(session.session_id);
            count > POST_CLASSIFICATION_PACKET_LIMIT
        } else {
            false
        } || session.packet_count() > PACKET_COUNT_RELEASE_CEILING
            || session.byte_count() > BYTE_COUNT_RELEASE_CEILING;

        HandlerOutcome { release }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packetd_core::tuple::Tuple;

    struct NoopDict;
    impl SessionDictionary for NoopDict {
        fn add_session_entry(&self, _ctid: u32, _key: &str, _value: AttachmentValue) {}
        fn delete_session(&self, _ctid: u32) {}
    }
    struct NoopReports;
    impl ReportsSink for NoopReports {
        fn log_event(&self, _event: Event) {}
    }

    fn session() -> Arc<Session> {
        let tuple = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
        Arc::new(Session::new(1, 42, tuple, Family::V4, 60, vec![]))
    }

    #[test]
    fn post_classification_count_increments_per_session() {
        let subscriber = ClassifierSubscriber::new(
            Arc::new(SocketManager::new("127.0.0.1:0".to_string(), std::time::Duration::from_secs(1), std::time::Duration::from_secs(1))),
            Arc::new(ApplicationTable::default()),
            Arc::new(NoopDict),
            Arc::new(NoopReports),
            None,
        );
        let s = session();
        assert_eq!(subscriber.bump_post_classification_count(s.session_id), 1);
        assert_eq!(subscriber.bump_post_classification_count(s.session_id), 2);
    }
}
