//! Per-flow session state.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use packetd_types::AttachmentValue;

use crate::conntrack::ConntrackEntry;
use crate::packet::Family;
use crate::registry::NfqueueHandle;
use crate::time::now_millis;
use crate::tuple::Tuple;

/// Allocates session identifiers with the layout described in the data
/// model: zero high 16 bits, next 32 bits the process start time (Unix
/// seconds), low 16 bits a wrapping counter that skips zero.
pub struct SessionIdAllocator {
    base: u64,
    counter: AtomicU16,
}

impl SessionIdAllocator {
    pub fn new(process_start_unix_secs: u64) -> Self {
        SessionIdAllocator {
            base: (process_start_unix_secs & 0xFFFF_FFFF) << 16,
            counter: AtomicU16::new(0),
        }
    }

    /// Allocates the next session id, skipping the all-zero low 16 bits on
    /// wraparound so a `sessionId` is never zero.
    pub fn next(&self) -> u64 {
        loop {
            let prev = self.counter.fetch_add(1, Ordering::Relaxed);
            let low16 = prev.wrapping_add(1);
            if low16 != 0 {
                return self.base | low16 as u64;
            }
        }
    }
}

/// Derived client/server interface hints, latched from the packet mark of
/// the first packet observed in that direction.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceInfo {
    pub interface_id: u8,
    pub interface_type: u8,
}

/// The outcome of an attachment write, used to decide whether to emit a
/// `session_classify` event column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentChange {
    Inserted,
    Updated,
    Unchanged,
    SkippedEmpty,
}

pub struct Session {
    pub session_id: u64,
    /// The ctid this session is filed under. Immutable for the session's
    /// lifetime; a tuple conflict replaces the session with a fresh one
    /// rather than mutating this field.
    pub conntrack_id: u32,
    pub client_side_tuple: Tuple,
    server_side_tuple: Mutex<Option<Tuple>>,
    client_interface: Mutex<Option<InterfaceInfo>>,
    server_interface: Mutex<Option<InterfaceInfo>>,
    pub family: Family,
    conntrack_confirmed: AtomicBool,
    creation_time_millis: u64,
    last_activity_millis: AtomicU64,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
    event_count: AtomicU64,
    subscriptions: Mutex<Vec<NfqueueHandle>>,
    attachments: Mutex<IndexMap<String, AttachmentValue>>,
    conntrack: Mutex<Weak<ConntrackEntry>>,
}

impl Session {
    pub fn new(
        session_id: u64,
        conntrack_id: u32,
        client_side_tuple: Tuple,
        family: Family,
        first_packet_len: u64,
        subscriber_snapshot: Vec<NfqueueHandle>,
    ) -> Self {
        let now = now_millis();
        Session {
            session_id,
            conntrack_id,
            client_side_tuple,
            server_side_tuple: Mutex::new(None),
            client_interface: Mutex::new(None),
            server_interface: Mutex::new(None),
            family,
            conntrack_confirmed: AtomicBool::new(false),
            creation_time_millis: now,
            last_activity_millis: AtomicU64::new(now),
            packet_count: AtomicU64::new(1),
            byte_count: AtomicU64::new(first_packet_len),
            event_count: AtomicU64::new(1),
            subscriptions: Mutex::new(subscriber_snapshot),
            attachments: Mutex::new(IndexMap::new()),
            conntrack: Mutex::new(Weak::new()),
        }
    }

    pub fn server_side_tuple(&self) -> Option<Tuple> {
        *self.server_side_tuple.lock().unwrap()
    }

    pub fn set_server_side_tuple(&self, tuple: Tuple) {
        *self.server_side_tuple.lock().unwrap() = Some(tuple);
    }

    pub fn conntrack_confirmed(&self) -> bool {
        self.conntrack_confirmed.load(Ordering::Acquire)
    }

    pub fn confirm_conntrack(&self) {
        self.conntrack_confirmed.store(true, Ordering::Release);
    }

    pub fn client_interface(&self) -> Option<InterfaceInfo> {
        *self.client_interface.lock().unwrap()
    }

    pub fn server_interface(&self) -> Option<InterfaceInfo> {
        *self.server_interface.lock().unwrap()
    }

    /// Latches the interface hint for a direction only on the first packet
    /// observed in that direction; later packets leave it unchanged.
    pub fn set_client_interface_if_unset(&self, id: u8, kind: u8) {
        let mut guard = self.client_interface.lock().unwrap();
        if guard.is_none() {
            *guard = Some(InterfaceInfo {
                interface_id: id,
                interface_type: kind,
            });
        }
    }

    pub fn set_server_interface_if_unset(&self, id: u8, kind: u8) {
        let mut guard = self.server_interface.lock().unwrap();
        if guard.is_none() {
            *guard = Some(InterfaceInfo {
                interface_id: id,
                interface_type: kind,
            });
        }
    }

    pub fn creation_time_millis(&self) -> u64 {
        self.creation_time_millis
    }

    pub fn last_activity_millis(&self) -> u64 {
        self.last_activity_millis.load(Ordering::Relaxed)
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    /// Updates packet/byte/event counters and `lastActivityTime` for one
    /// inbound packet.
    pub fn record_packet(&self, length: u64) {
        self.packet_count.fetch_add(1, Ordering::Relaxed);
        self.byte_count.fetch_add(length, Ordering::Relaxed);
        self.event_count.fetch_add(1, Ordering::Relaxed);
        self.last_activity_millis
            .store(now_millis(), Ordering::Relaxed);
    }

    pub fn link_conntrack(&self, entry: &Arc<ConntrackEntry>) {
        *self.conntrack.lock().unwrap() = Arc::downgrade(entry);
    }

    pub fn conntrack(&self) -> Option<Arc<ConntrackEntry>> {
        self.conntrack.lock().unwrap().upgrade()
    }

    pub fn subscriptions_snapshot(&self) -> Vec<NfqueueHandle> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Removes `owner` from the subscription list. Returns `true` if the
    /// list became empty as a result, signalling that the kernel bypass
    /// path should fire.
    pub fn release(&self, owner: &str) -> bool {
        let mut guard = self.subscriptions.lock().unwrap();
        guard.retain(|h| h.owner != owner);
        guard.is_empty()
    }

    /// Applies the "insert if absent; update if different; skip if equal;
    /// never store empty strings" attachment policy.
    pub fn attach(&self, key: &str, value: AttachmentValue) -> AttachmentChange {
        if value.is_empty_str() {
            return AttachmentChange::SkippedEmpty;
        }
        let mut guard = self.attachments.lock().unwrap();
        match guard.get(key) {
            None => {
                guard.insert(key.to_string(), value);
                AttachmentChange::Inserted
            }
            Some(existing) if *existing == value => AttachmentChange::Unchanged,
            Some(_) => {
                guard.insert(key.to_string(), value);
                AttachmentChange::Updated
            }
        }
    }

    pub fn attachment(&self, key: &str) -> Option<AttachmentValue> {
        self.attachments.lock().unwrap().get(key).cloned()
    }

    pub fn attachments_snapshot(&self) -> IndexMap<String, AttachmentValue> {
        self.attachments.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn allocator_never_yields_zero_low16_and_is_monotonic_within_a_second() {
        let alloc = SessionIdAllocator::new(1_700_000_000);
        let a = alloc.next();
        let b = alloc.next();
        assert_eq!(a & 0xFFFF, 1);
        assert_eq!(b & 0xFFFF, 2);
        assert_ne!(a, 0);
        assert!(b > a);
    }

    #[test]
    fn allocator_skips_zero_on_wrap() {
        let alloc = SessionIdAllocator::new(0);
        alloc.counter.store(u16::MAX, Ordering::Relaxed);
        let wrapped = alloc.next();
        assert_eq!(wrapped & 0xFFFF, 1, "low16 must skip 0 and land on 1");
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let alloc = Arc::new(SessionIdAllocator::new(1_700_000_000));
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            ids.insert(alloc.next());
        }
        assert_eq!(ids.len(), 1000);
    }

    fn tuple() -> Tuple {
        Tuple::new(
            6,
            "10.0.0.1".parse().unwrap(),
            1,
            "10.0.0.2".parse().unwrap(),
            2,
        )
    }

    #[test]
    fn new_session_seeds_counters_from_first_packet() {
        let s = Session::new(1, 42, tuple(), Family::V4, 60, vec![]);
        assert_eq!(s.packet_count(), 1);
        assert_eq!(s.byte_count(), 60);
        assert_eq!(s.event_count(), 1);
    }

    #[test]
    fn attach_policy_skips_empty_updates_on_change_unchanged_on_repeat() {
        let s = Session::new(1, 42, tuple(), Family::V4, 60, vec![]);
        assert_eq!(s.attach("k", AttachmentValue::from("")), AttachmentChange::SkippedEmpty);
        assert_eq!(s.attach("k", AttachmentValue::from(80u64)), AttachmentChange::Inserted);
        assert_eq!(s.attach("k", AttachmentValue::from(80u64)), AttachmentChange::Unchanged);
        assert_eq!(s.attach("k", AttachmentValue::from(90u64)), AttachmentChange::Updated);
    }

    #[test]
    fn interface_info_latches_on_first_packet_only() {
        let s = Session::new(1, 42, tuple(), Family::V4, 60, vec![]);
        s.set_client_interface_if_unset(3, 1);
        s.set_client_interface_if_unset(9, 2);
        let info = s.client_interface().unwrap();
        assert_eq!(info.interface_id, 3);
        assert_eq!(info.interface_type, 1);
    }

    #[test]
    fn release_reports_when_subscription_list_becomes_empty() {
        let s = Session::new(1, 42, tuple(), Family::V4, 60, vec![]);
        assert!(s.release("classify"), "already-empty list releases to empty");
    }
}
