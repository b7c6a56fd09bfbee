//! The two bypass mechanisms: releasing a subscriber from a session, and
//! telling the kernel to stop queueing a ctid's packets.

use packetd_types::AttachmentValue;

use crate::kernel::SessionDictionary;
use crate::session::Session;

pub const BYPASS_DICTIONARY_KEY: &str = "bypass_packetd";

/// Writes `bypass_packetd=true` into the session dictionary with a
/// zero-timeout entry. This is the one bypass signal the core ever emits:
/// a session's subscriber list going empty, a missed first packet (no
/// session to hold a list in the first place), and a subscriber count
/// already zero at dispatch start all funnel through here. The kernel
/// shim's own `bypassViaNftSet` is a registration-time capability, not
/// something this core calls directly.
pub fn bypass_via_dictionary(session_dict: &dyn SessionDictionary, ctid: u32) {
    session_dict.add_session_entry(ctid, BYPASS_DICTIONARY_KEY, AttachmentValue::Bool(true));
}

/// Releases `owner` from `session`'s subscriber list and, if the list is
/// now empty, writes the dictionary bypass key. Returns `true` if the
/// bypass fired.
pub fn release(
    session_dict: &dyn SessionDictionary,
    session: &Session,
    ctid: u32,
    owner: &str,
) -> bool {
    let became_empty = session.release(owner);
    if became_empty {
        bypass_via_dictionary(session_dict, ctid);
    }
    became_empty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Family;
    use crate::tuple::Tuple;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDict {
        writes: Mutex<Vec<(u32, String, AttachmentValue)>>,
        count: AtomicUsize,
    }

    impl SessionDictionary for FakeDict {
        fn add_session_entry(&self, ctid: u32, key: &str, value: AttachmentValue) {
            self.count.fetch_add(1, Ordering::Relaxed);
            self.writes
                .lock()
                .unwrap()
                .push((ctid, key.to_string(), value));
        }
        fn delete_session(&self, _ctid: u32) {}
    }

    #[test]
    fn release_writes_bypass_exactly_once_when_list_empties() {
        let dict = FakeDict::default();
        let tuple = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
        let session = Session::new(1, 42, tuple, Family::V4, 60, vec![]);

        let fired = release(&dict, &session, 42, "classify");
        assert!(fired);
        assert_eq!(dict.count.load(Ordering::Relaxed), 1);

        let writes = dict.writes.lock().unwrap();
        assert_eq!(writes[0].1, BYPASS_DICTIONARY_KEY);
        assert_eq!(writes[0].2, AttachmentValue::Bool(true));
    }
}
