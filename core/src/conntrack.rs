//! Kernel-tracked connection entries.
//!
//! Owned by the conntrack table; a [`crate::session::Session`] holds only a
//! weak back-reference for tuple reconciliation. Neither side owns the
//! other, since both are already owned by their respective tables.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Weak};

use crate::session::Session;
use crate::time::now_millis;
use crate::tuple::Tuple;

/// A kernel connection-tracking entry.
pub struct ConntrackEntry {
    pub conntrack_id: u32,
    conn_mark: AtomicU64,
    pub client_side_tuple: Tuple,
    server_side_tuple: Mutex<Option<Tuple>>,
    session: Mutex<Weak<Session>>,
    pub session_id: u64,
    c2s_bytes: AtomicU64,
    s2c_bytes: AtomicU64,
    c2s_rate_per_min: AtomicU64,
    s2c_rate_per_min: AtomicU64,
    creation_time_millis: u64,
    last_activity_millis: AtomicU64,
    event_count: AtomicU64,
}

impl ConntrackEntry {
    pub fn new(
        conntrack_id: u32,
        conn_mark: u32,
        client_side_tuple: Tuple,
        server_side_tuple: Tuple,
        session_id: u64,
        c2s_bytes: u64,
        s2c_bytes: u64,
    ) -> Self {
        let now = now_millis();
        ConntrackEntry {
            conntrack_id,
            conn_mark: AtomicU64::new(conn_mark as u64),
            client_side_tuple,
            server_side_tuple: Mutex::new(Some(server_side_tuple)),
            session: Mutex::new(Weak::new()),
            session_id,
            c2s_bytes: AtomicU64::new(c2s_bytes),
            s2c_bytes: AtomicU64::new(s2c_bytes),
            c2s_rate_per_min: AtomicU64::new(0),
            s2c_rate_per_min: AtomicU64::new(0),
            creation_time_millis: now,
            last_activity_millis: AtomicU64::new(now),
            event_count: AtomicU64::new(1),
        }
    }

    pub fn server_side_tuple(&self) -> Option<Tuple> {
        *self.server_side_tuple.lock().unwrap()
    }

    pub fn link_session(&self, session: &std::sync::Arc<Session>) {
        *self.session.lock().unwrap() = std::sync::Arc::downgrade(session);
    }

    pub fn session(&self) -> Option<std::sync::Arc<Session>> {
        self.session.lock().unwrap().upgrade()
    }

    pub fn conn_mark(&self) -> u32 {
        self.conn_mark.load(Ordering::Relaxed) as u32
    }

    pub fn last_activity_millis(&self) -> u64 {
        self.last_activity_millis.load(Ordering::Relaxed)
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    /// Applies a conntrack UPDATE event. Returns `true` if the low 28 bits
    /// of the mark changed; only those bits are ever compared.
    pub fn apply_update(&self, new_mark: u32, c2s_bytes: u64, s2c_bytes: u64) -> bool {
        const LOW_28_BITS: u32 = 0x0FFF_FFFF;
        let mark_changed =
            (self.conn_mark.load(Ordering::Relaxed) as u32) & LOW_28_BITS != new_mark & LOW_28_BITS;
        if mark_changed {
            self.conn_mark.store(new_mark as u64, Ordering::Relaxed);
        }

        self.last_activity_millis
            .store(now_millis(), Ordering::Relaxed);
        self.event_count.fetch_add(1, Ordering::Relaxed);

        let prev_c2s = self.c2s_bytes.swap(c2s_bytes, Ordering::Relaxed);
        let prev_s2c = self.s2c_bytes.swap(s2c_bytes, Ordering::Relaxed);

        let (c2s_delta, s2c_delta) = if c2s_bytes < prev_c2s || s2c_bytes < prev_s2c {
            // UDP "new flow reusing an old tuple": counters went backwards.
            // Treat the new absolute values as the deltas for this update.
            (c2s_bytes, s2c_bytes)
        } else {
            (c2s_bytes - prev_c2s, s2c_bytes - prev_s2c)
        };

        self.c2s_rate_per_min
            .store(c2s_delta / 60, Ordering::Relaxed);
        self.s2c_rate_per_min
            .store(s2c_delta / 60, Ordering::Relaxed);

        mark_changed
    }

    pub fn c2s_bytes(&self) -> u64 {
        self.c2s_bytes.load(Ordering::Relaxed)
    }

    pub fn s2c_bytes(&self) -> u64 {
        self.s2c_bytes.load(Ordering::Relaxed)
    }

    pub fn c2s_rate_per_min(&self) -> u64 {
        self.c2s_rate_per_min.load(Ordering::Relaxed)
    }

    pub fn s2c_rate_per_min(&self) -> u64 {
        self.s2c_rate_per_min.load(Ordering::Relaxed)
    }

    pub fn creation_time_millis(&self) -> u64 {
        self.creation_time_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn tuple() -> Tuple {
        Tuple::new(6, "10.0.0.1".parse::<IpAddr>().unwrap(), 1, "10.0.0.2".parse::<IpAddr>().unwrap(), 2)
    }

    #[test]
    fn update_computes_positive_deltas_as_rates() {
        let entry = ConntrackEntry::new(1, 0, tuple(), tuple(), 100, 0, 0);
        entry.apply_update(0, 6000, 1200);
        assert_eq!(entry.c2s_rate_per_min(), 100);
        assert_eq!(entry.s2c_rate_per_min(), 20);
    }

    #[test]
    fn negative_delta_resets_baseline_to_absolute_value() {
        let entry = ConntrackEntry::new(1, 0, tuple(), tuple(), 100, 5000, 5000);
        // bytes go backwards: UDP reused the tuple for a new flow
        entry.apply_update(0, 120, 60);
        assert_eq!(entry.c2s_bytes(), 120);
        assert_eq!(entry.c2s_rate_per_min(), 2);
    }

    #[test]
    fn mark_change_only_detected_in_low_28_bits() {
        let entry = ConntrackEntry::new(1, 0x1000_0000, tuple(), tuple(), 100, 0, 0);
        // only the high 4 bits differ
        let changed = entry.apply_update(0x2000_0000, 0, 0);
        assert!(!changed, "high-bit-only change must not register as a mark change");

        let changed = entry.apply_update(0x2000_0001, 0, 0);
        assert!(changed, "a low-28-bit change must register");
    }
}
