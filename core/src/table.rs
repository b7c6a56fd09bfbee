//! A mutex-guarded map keyed by conntrack id, shared by the session and
//! conntrack tables.
//!
//! A single mutex protects the mapping itself; operations on an entry's
//! contents (counters, subscriptions) do not hold this lock, only the
//! lookup does.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

pub struct StaleTable<K, V> {
    inner: Mutex<HashMap<K, Arc<V>>>,
}

impl<K, V> Default for StaleTable<K, V> {
    fn default() -> Self {
        StaleTable {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> StaleTable<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, key: &K) -> Option<Arc<V>> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    /// Replaces any existing mapping for `key`. Logs a warning if it
    /// overwrote a live entry; the caller is responsible for invalidating
    /// whatever the replaced entry held (this table never destroys it).
    pub fn insert(&self, key: K, value: Arc<V>, entry_kind: &str) {
        let mut guard = self.inner.lock().unwrap();
        if guard.insert(key, value).is_some() {
            log::warn!("{entry_kind} table insert overwrote an existing entry for this key");
        }
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.inner.lock().unwrap().remove(key)
    }

    /// Removes `key` only if its current value is identical (by pointer)
    /// to `expected`. Used by `Session::remove_self` to avoid deleting a
    /// session that replaced the caller under a reused ctid.
    pub fn remove_if_same(&self, key: &K, expected: &Arc<V>) -> bool {
        let mut guard = self.inner.lock().unwrap();
        match guard.get(key) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                guard.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry for which `is_stale` returns true, returning the
    /// removed values so the caller can finish tearing them down (e.g.
    /// invalidate the linked conntrack/session).
    pub fn reap<F: Fn(&V) -> bool>(&self, is_stale: F) -> Vec<Arc<V>> {
        let mut guard = self.inner.lock().unwrap();
        let stale_keys: Vec<K> = guard
            .iter()
            .filter(|(_, v)| is_stale(v))
            .map(|(k, _)| k.clone())
            .collect();
        stale_keys
            .into_iter()
            .filter_map(|k| guard.remove(&k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_and_find_returns_current() {
        let table: StaleTable<u32, String> = StaleTable::new();
        table.insert(1, Arc::new("a".to_string()), "test");
        table.insert(1, Arc::new("b".to_string()), "test");
        assert_eq!(*table.find(&1).unwrap(), "b");
    }

    #[test]
    fn remove_is_idempotent() {
        let table: StaleTable<u32, String> = StaleTable::new();
        table.insert(1, Arc::new("a".to_string()), "test");
        assert!(table.remove(&1).is_some());
        assert!(table.remove(&1).is_none());
    }

    #[test]
    fn remove_if_same_refuses_when_slot_was_replaced() {
        let table: StaleTable<u32, String> = StaleTable::new();
        let first = Arc::new("a".to_string());
        table.insert(1, first.clone(), "test");
        let second = Arc::new("b".to_string());
        table.insert(1, second.clone(), "test");

        assert!(!table.remove_if_same(&1, &first));
        assert_eq!(*table.find(&1).unwrap(), "b");
        assert!(table.remove_if_same(&1, &second));
        assert!(table.find(&1).is_none());
    }

    #[test]
    fn reap_removes_only_matching_entries() {
        let table: StaleTable<u32, i32> = StaleTable::new();
        table.insert(1, Arc::new(1), "test");
        table.insert(2, Arc::new(2), "test");
        let removed = table.reap(|v| *v == 1);
        assert_eq!(removed.len(), 1);
        assert!(table.find(&1).is_none());
        assert!(table.find(&2).is_some());
    }
}
