//! End-to-end scenarios driving a [`Dispatcher`] through the three dispatch
//! entry points with in-memory fakes, one test per numbered scenario.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use packetd_core::dispatch::nfqueue::Verdict;
use packetd_core::kernel::{Event, KernelShim, ReportsSink, SessionDictionary};
use packetd_core::packet::{Family, ParsedPacket};
use packetd_core::registry::{HandlerOutcome, NfqueueHandler};
use packetd_core::session::{AttachmentChange, Session};
use packetd_core::tuple::Tuple;
use packetd_core::Dispatcher;
use packetd_types::AttachmentValue;

const PROCESS_START: u64 = 1_700_000_000;

#[derive(Default)]
struct FakeKernel {
    bypassed: Mutex<Vec<u32>>,
}

impl KernelShim for FakeKernel {
    fn bypass_via_nft_set(&self, ctid: u32, _timeout_ms: u32) {
        self.bypassed.lock().unwrap().push(ctid);
    }
}

#[derive(Default)]
struct FakeDict {
    entries: Mutex<HashMap<(u32, String), AttachmentValue>>,
}

impl SessionDictionary for FakeDict {
    fn add_session_entry(&self, ctid: u32, key: &str, value: AttachmentValue) {
        self.entries.lock().unwrap().insert((ctid, key.to_string()), value);
    }

    fn delete_session(&self, ctid: u32) {
        self.entries.lock().unwrap().retain(|(c, _), _| *c != ctid);
    }
}

#[derive(Default)]
struct FakeReports {
    events: Mutex<Vec<Event>>,
}

impl ReportsSink for FakeReports {
    fn log_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

fn dispatcher() -> (Arc<Dispatcher>, Arc<FakeKernel>, Arc<FakeDict>, Arc<FakeReports>) {
    let kernel = Arc::new(FakeKernel::default());
    let dict = Arc::new(FakeDict::default());
    let reports = Arc::new(FakeReports::default());
    let dispatcher = Dispatcher::new(PROCESS_START, kernel.clone(), dict.clone(), reports.clone());
    (Arc::new(dispatcher), kernel, dict, reports)
}

/// Builds a minimal well-formed IPv4 packet: 20-byte IP header, 20-byte TCP
/// header (SYN, no options), and `payload_len` zero bytes of payload.
fn build_ipv4_tcp_packet(src: IpAddr, dst: IpAddr, sport: u16, dport: u16, payload_len: usize) -> Vec<u8> {
    let (IpAddr::V4(src), IpAddr::V4(dst)) = (src, dst) else {
        panic!("scenario fixtures are IPv4-only");
    };
    let mut buf = vec![0u8; 40 + payload_len];
    buf[0] = 0x45;
    buf[9] = 6; // TCP
    buf[12..16].copy_from_slice(&src.octets());
    buf[16..20].copy_from_slice(&dst.octets());
    buf[20..22].copy_from_slice(&sport.to_be_bytes());
    buf[22..24].copy_from_slice(&dport.to_be_bytes());
    buf[33] = 0x02; // SYN
    buf[32] = 5 << 4;
    buf
}

struct CountingSubscriber {
    calls: AtomicUsize,
}

impl CountingSubscriber {
    fn new() -> Self {
        CountingSubscriber { calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl NfqueueHandler for CountingSubscriber {
    async fn handle_packet(&self, _session: &Arc<Session>, _packet: &ParsedPacket<'_>, _client_to_server: bool) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::Relaxed);
        HandlerOutcome { release: false }
    }
}

/// Scenario 1: first-packet new-session happy path.
#[tokio::test]
async fn first_packet_creates_a_session_with_the_registry_snapshot() {
    let (dispatcher, _kernel, _dict, _reports) = dispatcher();
    let subscriber = Arc::new(CountingSubscriber::new());
    dispatcher.registry.insert_nfqueue("track", 0, subscriber.clone());

    let src: IpAddr = "10.0.0.5".parse().unwrap();
    let dst: IpAddr = "93.184.216.34".parse().unwrap();
    let buf = build_ipv4_tcp_packet(src, dst, 54321, 443, 20);
    assert_eq!(buf.len(), 60);

    let verdict = dispatcher.on_packet(42, Family::V4, &buf, 0x1000_0001).await;
    assert_eq!(verdict, Verdict::Accept);

    let session = dispatcher.sessions.find(&42).expect("session must be created");
    assert!(session.session_id > 0);
    assert_eq!(session.client_interface().unwrap().interface_id, 1);
    assert_eq!(session.packet_count(), 1);
    assert_eq!(session.byte_count(), 60);
    assert_eq!(session.subscriber_count(), 1);
    assert_eq!(subscriber.calls.load(Ordering::Relaxed), 1);
}

struct ClassifyOnceSubscriber {
    reports: Arc<dyn ReportsSink>,
}

#[async_trait]
impl NfqueueHandler for ClassifyOnceSubscriber {
    async fn handle_packet(&self, session: &Arc<Session>, _packet: &ParsedPacket<'_>, _client_to_server: bool) -> HandlerOutcome {
        let mut modified = Vec::new();
        let mut columns = Vec::new();
        if session.attach("application_id", AttachmentValue::from("0x1a")) != AttachmentChange::Unchanged {
            modified.push("application_id".to_string());
            columns.push(("application_id".to_string(), AttachmentValue::from("0x1a")));
        }
        if session.attach("application_confidence", AttachmentValue::from(90u64)) != AttachmentChange::Unchanged {
            modified.push("application_confidence".to_string());
            columns.push(("application_confidence".to_string(), AttachmentValue::from(90u64)));
        }
        if !modified.is_empty() {
            self.reports.log_event(Event::session_classify(session.session_id, columns, modified));
        }
        HandlerOutcome { release: true }
    }
}

/// Scenario 2: a terminal classification releases the (sole) subscriber and
/// emits exactly one bypass write.
#[tokio::test]
async fn classifier_terminal_release_bypasses_once() {
    let (dispatcher, kernel, dict, reports) = dispatcher();

    let tuple = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
    let classify: Arc<dyn NfqueueHandler> = Arc::new(ClassifyOnceSubscriber { reports: reports.clone() });
    let handle = packetd_core::registry::SubscriberHandle {
        owner: "classify".to_string(),
        priority: 0,
        handler: classify,
    };
    let session = Arc::new(Session::new(100, 7, tuple, Family::V4, 400, vec![handle]));
    session.record_packet(400);
    session.record_packet(400);
    assert_eq!(session.packet_count(), 3);
    assert_eq!(session.byte_count(), 1200);
    dispatcher.sessions.insert(7, session.clone(), "session");

    let buf = build_ipv4_tcp_packet("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), 1, 2, 0);
    let verdict = dispatcher.on_packet(7, Family::V4, &buf, 0).await;
    assert_eq!(verdict, Verdict::Accept);

    assert_eq!(session.attachment("application_id"), Some(AttachmentValue::from("0x1a")));
    assert_eq!(session.attachment("application_confidence"), Some(AttachmentValue::from(90u64)));
    assert_eq!(session.subscriber_count(), 0, "the only subscriber must have released");
    assert_eq!(reports.events().len(), 1);
    assert_eq!(reports.events()[0].modified_columns.len(), 2);
    assert_eq!(kernel.bypassed_ctids().len(), 0, "release goes through the dictionary, not the kernel shim");
    assert_eq!(dict.entries.lock().unwrap().get(&(7, "bypass_packetd".to_string())), Some(&AttachmentValue::Bool(true)));
}

impl FakeKernel {
    fn bypassed_ctids(&self) -> Vec<u32> {
        self.bypassed.lock().unwrap().clone()
    }
}

struct ConfidenceGuardedSubscriber;

#[async_trait]
impl NfqueueHandler for ConfidenceGuardedSubscriber {
    async fn handle_packet(&self, session: &Arc<Session>, _packet: &ParsedPacket<'_>, _client_to_server: bool) -> HandlerOutcome {
        let prior_confidence = match session.attachment("application_confidence") {
            Some(AttachmentValue::Unsigned(n)) => n as u32,
            _ => 0,
        };
        let new_confidence = 50u32;
        if new_confidence < prior_confidence {
            return HandlerOutcome { release: false };
        }
        session.attach("application_confidence", AttachmentValue::from(new_confidence as u64));
        HandlerOutcome { release: false }
    }
}

/// Scenario 3: a confidence regression is silently ignored.
#[tokio::test]
async fn confidence_regression_leaves_the_attachment_untouched() {
    let (dispatcher, _kernel, _dict, _reports) = dispatcher();

    let tuple = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
    let subscriber: Arc<dyn NfqueueHandler> = Arc::new(ConfidenceGuardedSubscriber);
    let handle = packetd_core::registry::SubscriberHandle {
        owner: "classify".to_string(),
        priority: 0,
        handler: subscriber,
    };
    let session = Arc::new(Session::new(101, 8, tuple, Family::V4, 60, vec![handle]));
    session.attach("application_confidence", AttachmentValue::from(80u64));
    dispatcher.sessions.insert(8, session.clone(), "session");

    let buf = build_ipv4_tcp_packet("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), 1, 2, 0);
    dispatcher.on_packet(8, Family::V4, &buf, 0).await;

    assert_eq!(session.attachment("application_confidence"), Some(AttachmentValue::from(80u64)));
}

/// Scenario 4: a conntrack DELETE removes both the conntrack entry and its
/// linked session.
#[tokio::test]
async fn conntrack_delete_removes_the_session() {
    use packetd_core::dispatch::conntrack::ConntrackEventKind;

    let (dispatcher, _kernel, _dict, _reports) = dispatcher();
    let tuple = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);

    let session = Arc::new(Session::new(200, 99, tuple, Family::V4, 60, vec![]));
    dispatcher.sessions.insert(99, session.clone(), "session");
    dispatcher
        .on_conntrack(99, 0, Family::V4, ConntrackEventKind::New, tuple, tuple, 0, 0)
        .await
        .unwrap();

    assert!(dispatcher.conntracks.find(&99).is_some());

    dispatcher
        .on_conntrack(99, 0, Family::V4, ConntrackEventKind::Delete, tuple, tuple, 0, 0)
        .await
        .unwrap();

    assert!(dispatcher.sessions.find(&99).is_none());
    assert!(dispatcher.conntracks.find(&99).is_none());
}

/// Scenario 5: a ctid reused by a new tuple ahead of the matching conntrack
/// DELETE replaces the old session with a fresh one.
#[tokio::test]
async fn ctid_reuse_replaces_the_session_before_conntrack_delete() {
    let (dispatcher, _kernel, _dict, _reports) = dispatcher();

    let t1 = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
    let old_session = Arc::new(Session::new(300, 17, t1, Family::V4, 60, vec![]));
    let old_session_id = old_session.session_id;
    dispatcher.sessions.insert(17, old_session, "session");

    let src: IpAddr = "10.0.0.9".parse().unwrap();
    let dst: IpAddr = "10.0.0.10".parse().unwrap();
    let buf = build_ipv4_tcp_packet(src, dst, 9, 10, 0);
    dispatcher.on_packet(17, Family::V4, &buf, 0x1000_0000).await;

    let new_session = dispatcher.sessions.find(&17).expect("a replacement session must exist");
    assert_ne!(new_session.session_id, old_session_id);
    assert_eq!(new_session.client_side_tuple.client_addr, src);
}

struct FastSubscriber {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl NfqueueHandler for FastSubscriber {
    async fn handle_packet(&self, _session: &Arc<Session>, _packet: &ParsedPacket<'_>, _client_to_server: bool) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::Relaxed);
        HandlerOutcome { release: false }
    }
}

struct SlowSubscriber {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl NfqueueHandler for SlowSubscriber {
    async fn handle_packet(&self, _session: &Arc<Session>, _packet: &ParsedPacket<'_>, _client_to_server: bool) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(60)).await;
        HandlerOutcome { release: false }
    }
}

/// Scenario 6: a plugin that misses its 30 s deadline is synthetically
/// released and is not invoked again for that session.
#[tokio::test(start_paused = true)]
async fn plugin_timeout_synthesizes_a_release_and_excludes_the_slow_plugin() {
    let (dispatcher, _kernel, _dict, _reports) = dispatcher();

    let fast_calls = Arc::new(AtomicUsize::new(0));
    let slow_calls = Arc::new(AtomicUsize::new(0));
    dispatcher.registry.insert_nfqueue("fast", 0, Arc::new(FastSubscriber { calls: fast_calls.clone() }));
    dispatcher.registry.insert_nfqueue("slow", 0, Arc::new(SlowSubscriber { calls: slow_calls.clone() }));

    let src: IpAddr = "10.0.0.1".parse().unwrap();
    let dst: IpAddr = "10.0.0.2".parse().unwrap();
    let buf = build_ipv4_tcp_packet(src, dst, 1, 2, 0);

    let verdict = dispatcher.on_packet(55, Family::V4, &buf, 0x1000_0000).await;
    assert_eq!(verdict, Verdict::Accept);
    assert_eq!(slow_calls.load(Ordering::Relaxed), 1);

    let session = dispatcher.sessions.find(&55).expect("session must exist");
    assert_eq!(session.subscriber_count(), 1, "the slow plugin must have been released");

    dispatcher.on_packet(55, Family::V4, &buf, 0).await;
    assert_eq!(slow_calls.load(Ordering::Relaxed), 1, "a released plugin is never invoked again");
    assert_eq!(fast_calls.load(Ordering::Relaxed), 2);
}
