//! The process-wide table of subscriber plugins.
//!
//! Populated once at startup and read on every dispatch. Three independent
//! maps back the nfqueue/conntrack/netlogger pipelines because each kind
//! observes a different callback shape; `owner` is the idempotency key for
//! all three.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::conntrack::ConntrackEntry;
use crate::packet::ParsedPacket;
use crate::session::Session;

/// Result a nfqueue handler hands back to the dispatcher after a wave.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerOutcome {
    pub release: bool,
}

#[async_trait]
pub trait NfqueueHandler: Send + Sync {
    async fn handle_packet(
        &self,
        session: &Arc<Session>,
        packet: &ParsedPacket<'_>,
        client_to_server: bool,
    ) -> HandlerOutcome;
}

#[async_trait]
pub trait ConntrackHandler: Send + Sync {
    async fn handle_conntrack(
        &self,
        session: Option<&Arc<Session>>,
        entry: &Arc<ConntrackEntry>,
        event: crate::dispatch::conntrack::ConntrackEventKind,
    );
}

#[async_trait]
pub trait NetLoggerHandler: Send + Sync {
    async fn handle_netlog(&self, event: &crate::dispatch::netlogger::NetLogEvent);
}

/// A subscriber's registration, copied by value into a snapshot.
pub struct SubscriberHandle<H: ?Sized> {
    pub owner: String,
    pub priority: u8,
    pub handler: Arc<H>,
}

impl<H: ?Sized> Clone for SubscriberHandle<H> {
    fn clone(&self) -> Self {
        SubscriberHandle {
            owner: self.owner.clone(),
            priority: self.priority,
            handler: Arc::clone(&self.handler),
        }
    }
}

pub type NfqueueHandle = SubscriberHandle<dyn NfqueueHandler>;
pub type ConntrackHandle = SubscriberHandle<dyn ConntrackHandler>;
pub type NetLoggerHandle = SubscriberHandle<dyn NetLoggerHandler>;

/// The upper bound enforced by the wave-dispatch loop. A subscriber
/// registered above this is a programming error, not a runtime condition
/// to recover from.
pub const PRIORITY_CEILING: u8 = 100;

#[derive(Default)]
pub struct SubscriberRegistry {
    nfqueue: RwLock<HashMap<String, NfqueueHandle>>,
    conntrack: RwLock<HashMap<String, ConntrackHandle>>,
    netlogger: RwLock<HashMap<String, NetLoggerHandle>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_nfqueue(&self, owner: &str, priority: u8, handler: Arc<dyn NfqueueHandler>) {
        self.nfqueue.write().unwrap().insert(
            owner.to_string(),
            SubscriberHandle {
                owner: owner.to_string(),
                priority,
                handler,
            },
        );
    }

    pub fn insert_conntrack(&self, owner: &str, priority: u8, handler: Arc<dyn ConntrackHandler>) {
        self.conntrack.write().unwrap().insert(
            owner.to_string(),
            SubscriberHandle {
                owner: owner.to_string(),
                priority,
                handler,
            },
        );
    }

    pub fn insert_netlogger(&self, owner: &str, priority: u8, handler: Arc<dyn NetLoggerHandler>) {
        self.netlogger.write().unwrap().insert(
            owner.to_string(),
            SubscriberHandle {
                owner: owner.to_string(),
                priority,
                handler,
            },
        );
    }

    pub fn mirror_nfqueue(&self) -> Vec<NfqueueHandle> {
        self.nfqueue.read().unwrap().values().cloned().collect()
    }

    pub fn mirror_conntrack(&self) -> Vec<ConntrackHandle> {
        self.conntrack.read().unwrap().values().cloned().collect()
    }

    pub fn mirror_netlogger(&self) -> Vec<NetLoggerHandle> {
        self.netlogger.read().unwrap().values().cloned().collect()
    }
}

/// Groups a snapshot into ascending-priority waves.
pub fn into_waves<H>(mut handles: Vec<SubscriberHandle<H>>) -> Vec<(u8, Vec<SubscriberHandle<H>>)> {
    handles.sort_by_key(|h| h.priority);
    let mut waves: Vec<(u8, Vec<SubscriberHandle<H>>)> = Vec::new();
    for handle in handles {
        match waves.last_mut() {
            Some((priority, members)) if *priority == handle.priority => members.push(handle),
            _ => waves.push((handle.priority, vec![handle])),
        }
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl NfqueueHandler for Noop {
        async fn handle_packet(
            &self,
            _session: &Arc<Session>,
            _packet: &ParsedPacket<'_>,
            _client_to_server: bool,
        ) -> HandlerOutcome {
            HandlerOutcome::default()
        }
    }

    #[test]
    fn reinsertion_replaces_by_owner() {
        let registry = SubscriberRegistry::new();
        registry.insert_nfqueue("classify", 5, Arc::new(Noop));
        registry.insert_nfqueue("classify", 9, Arc::new(Noop));
        let mirror = registry.mirror_nfqueue();
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror[0].priority, 9);
    }

    #[test]
    fn waves_group_and_sort_by_priority() {
        let handles = vec![
            SubscriberHandle {
                owner: "b".into(),
                priority: 2,
                handler: Arc::new(Noop) as Arc<dyn NfqueueHandler>,
            },
            SubscriberHandle {
                owner: "a".into(),
                priority: 0,
                handler: Arc::new(Noop),
            },
            SubscriberHandle {
                owner: "c".into(),
                priority: 0,
                handler: Arc::new(Noop),
            },
        ];
        let waves = into_waves(handles);
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].0, 0);
        assert_eq!(waves[0].1.len(), 2);
        assert_eq!(waves[1].0, 2);
    }
}
