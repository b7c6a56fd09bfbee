//! NFLOG fan-out: stateless, no session resolution, no per-handler timeout.

use std::net::IpAddr;

use crate::Dispatcher;

/// One NFLOG callback from the kernel shim.
#[derive(Debug, Clone)]
pub struct NetLogEvent {
    pub version: u8,
    pub protocol: u8,
    pub icmp_type: Option<u8>,
    pub src_interface: u8,
    pub dst_interface: u8,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub mark: u32,
    pub prefix: String,
}

impl Dispatcher {
    /// Fans an NFLOG event out to netlogger subscribers.
    pub async fn on_netlog(&self, event: NetLogEvent) {
        let handles = self.registry.mirror_netlogger();
        if handles.is_empty() {
            return;
        }
        super::for_each_wave(handles, move |handler| {
            let event = event.clone();
            async move { handler.handle_netlog(&event).await }
        })
        .await;
    }
}
