//! In-memory stand-ins for the kernel, session dictionary, and reports
//! sink. Production wiring talks to the real kernel and an external store;
//! this binary exists to drive the dispatch core deterministically instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use packetd_core::conntrack::ConntrackEntry;
use packetd_core::dispatch::conntrack::ConntrackEventKind;
use packetd_core::dispatch::netlogger::NetLogEvent;
use packetd_core::kernel::{Event, KernelShim, ReportsSink, SessionDictionary};
use packetd_core::packet::ParsedPacket;
use packetd_core::registry::{ConntrackHandler, HandlerOutcome, NetLoggerHandler, NfqueueHandler};
use packetd_core::session::Session;
use packetd_types::AttachmentValue;

#[derive(Default)]
pub struct RecordingKernel {
    bypassed: Mutex<Vec<(u32, u32)>>,
}

impl RecordingKernel {
    pub fn bypassed_ctids(&self) -> Vec<u32> {
        self.bypassed.lock().unwrap().iter().map(|(ctid, _)| *ctid).collect()
    }
}

impl KernelShim for RecordingKernel {
    fn bypass_via_nft_set(&self, ctid: u32, timeout_ms: u32) {
        log::debug!("kernel: bypass ctid {ctid} (timeout {timeout_ms}ms)");
        self.bypassed.lock().unwrap().push((ctid, timeout_ms));
    }
}

#[derive(Default)]
pub struct RecordingDictionary {
    entries: Mutex<HashMap<u32, HashMap<String, AttachmentValue>>>,
}

impl RecordingDictionary {
    pub fn entry(&self, ctid: u32, key: &str) -> Option<AttachmentValue> {
        self.entries.lock().unwrap().get(&ctid)?.get(key).cloned()
    }
}

impl SessionDictionary for RecordingDictionary {
    fn add_session_entry(&self, ctid: u32, key: &str, value: AttachmentValue) {
        self.entries
            .lock()
            .unwrap()
            .entry(ctid)
            .or_default()
            .insert(key.to_string(), value);
    }

    fn delete_session(&self, ctid: u32) {
        self.entries.lock().unwrap().remove(&ctid);
    }
}

#[derive(Default)]
pub struct RecordingReports {
    events: Mutex<Vec<Event>>,
}

impl RecordingReports {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl ReportsSink for RecordingReports {
    fn log_event(&self, event: Event) {
        log::info!("report: {} on table {}", event.name, event.table);
        self.events.lock().unwrap().push(event);
    }
}

/// A subscriber to all three pipelines that does nothing but log, standing
/// in for a real plugin so fixture playback has something to dispatch to.
pub struct LoggingSubscriber;

#[async_trait]
impl NfqueueHandler for LoggingSubscriber {
    async fn handle_packet(&self, session: &Arc<Session>, packet: &ParsedPacket<'_>, client_to_server: bool) -> HandlerOutcome {
        log::info!(
            "session {}: packet ({} bytes, {}) client_to_server={client_to_server}",
            session.session_id,
            packet.payload.len(),
            session.client_side_tuple,
        );
        HandlerOutcome { release: false }
    }
}

#[async_trait]
impl ConntrackHandler for LoggingSubscriber {
    async fn handle_conntrack(&self, session: Option<&Arc<Session>>, entry: &Arc<ConntrackEntry>, event: ConntrackEventKind) {
        log::info!(
            "conntrack {:?} ctid={} session={:?}",
            event,
            entry.conntrack_id,
            session.map(|s| s.session_id)
        );
    }
}

#[async_trait]
impl NetLoggerHandler for LoggingSubscriber {
    async fn handle_netlog(&self, event: &NetLogEvent) {
        log::info!("netlog {}:{} -> {}:{} prefix={}", event.src_addr, event.src_port, event.dst_addr, event.dst_port, event.prefix);
    }
}
