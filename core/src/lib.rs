//! The packet dispatch core: session/conntrack identity, the subscriber
//! registry, and the three dispatch pipelines (NFQUEUE, conntrack, NFLOG)
//! that drive them.
//!
//! This crate owns everything correctness-critical about flow identity and
//! plugin fan-out. It never talks to the kernel or an external store
//! directly — those are the [`kernel`] module's trait contracts, wired in
//! by a binary such as `packetd-harness`.

pub mod bypass;
pub mod config;
pub mod conntrack;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod logconfig;
pub mod mark;
pub mod packet;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod table;
pub mod time;
pub mod tuple;

use std::sync::Arc;
use std::time::Duration;

use conntrack::ConntrackEntry;
use kernel::{KernelShim, ReportsSink, SessionDictionary};
use packetd_eventqueue::RateLimiter;
use registry::SubscriberRegistry;
use session::{Session, SessionIdAllocator};
use table::StaleTable;

pub type SessionTable = StaleTable<u32, Session>;
pub type ConntrackTable = StaleTable<u32, ConntrackEntry>;

/// Ties the tables, the registry, and the external collaborators together
/// behind the three dispatch entry points.
pub struct Dispatcher {
    pub sessions: SessionTable,
    pub conntracks: ConntrackTable,
    pub registry: SubscriberRegistry,
    pub id_alloc: SessionIdAllocator,
    pub kernel: Arc<dyn KernelShim>,
    pub session_dict: Arc<dyn SessionDictionary>,
    pub reports: Arc<dyn ReportsSink>,
    pub nfqueue_handler_timeout: Duration,
    /// Backs the "%OC" rate-limited logging sites (plugin timeouts, table
    /// overwrite warnings) so a persistently misbehaving subscriber or a
    /// hot ctid doesn't flood the log.
    pub rate_limiter: RateLimiter,
}

impl Dispatcher {
    pub fn new(
        process_start_unix_secs: u64,
        kernel: Arc<dyn KernelShim>,
        session_dict: Arc<dyn SessionDictionary>,
        reports: Arc<dyn ReportsSink>,
    ) -> Self {
        Dispatcher {
            sessions: SessionTable::new(),
            conntracks: ConntrackTable::new(),
            registry: SubscriberRegistry::new(),
            id_alloc: SessionIdAllocator::new(process_start_unix_secs),
            kernel,
            session_dict,
            reports,
            nfqueue_handler_timeout: Duration::from_secs(30),
            rate_limiter: RateLimiter::new(),
        }
    }
}
