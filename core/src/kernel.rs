//! Contracts for the external collaborators this core never implements:
//! the kernel shim, the session dictionary, and the reports sink.
//!
//! Production wiring supplies real implementations that talk to the kernel
//! and an external store; the harness binary supplies in-memory fakes for
//! deterministic replay.

use std::collections::HashSet;

use packetd_types::AttachmentValue;

/// The kernel-side bypass call: marks a ctid so the kernel stops queueing
/// its packets.
pub trait KernelShim: Send + Sync {
    fn bypass_via_nft_set(&self, ctid: u32, timeout_ms: u32);
}

/// The key/value store that persists attachments to kernel-visible storage.
pub trait SessionDictionary: Send + Sync {
    fn add_session_entry(&self, ctid: u32, key: &str, value: AttachmentValue);
    fn delete_session(&self, ctid: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOp {
    Insert,
    Update,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub name: &'static str,
    pub table: &'static str,
    pub sql_op: SqlOp,
    pub columns: Vec<(String, AttachmentValue)>,
    pub modified_columns: Vec<String>,
}

impl Event {
    /// Builds the single event class this core emits: `session_classify`.
    pub fn session_classify(
        session_id: u64,
        columns: Vec<(String, AttachmentValue)>,
        modified_columns: Vec<String>,
    ) -> Self {
        let mut columns = columns;
        columns.push(("session_id".to_string(), AttachmentValue::Unsigned(session_id)));
        Event {
            name: "session_classify",
            table: "session_classify",
            sql_op: SqlOp::Update,
            columns,
            modified_columns,
        }
    }
}

pub trait ReportsSink: Send + Sync {
    fn log_event(&self, event: Event);
}

/// Deterministic replay: hands back the recorded NFQUEUE and conntrack
/// ctids from a captured warehouse file so a test driver can replay them in
/// order through the dispatcher.
pub trait WarehousePlayback {
    fn playback_file(&self, path: &str) -> std::io::Result<(HashSet<u32>, HashSet<u32>)>;
    fn cleanup(&self);
}
