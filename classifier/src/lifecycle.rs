//! The conntrack-facing half of the classifier: tells the DPI engine when a
//! flow starts and ends, so its own per-ctid state doesn't outlive ours.
//!
//! `CREATE` rides the conntrack NEW event (it needs the 5-tuple, which the
//! packet handler's `PACKET` frame doesn't carry); `REMOVE` rides DELETE.
//! Both are fire-and-forget: a dropped CREATE/REMOVE degrades the engine's
//! own bookkeeping but never blocks dispatch, so failures are logged at
//! debug and swallowed rather than propagated as a release.

use async_trait::async_trait;
use packetd_core::conntrack::ConntrackEntry;
use packetd_core::dispatch::conntrack::ConntrackEventKind;
use packetd_core::registry::ConntrackHandler;
use packetd_core::session::Session;
use std::sync::Arc;

use crate::packet_handler::ClassifierSubscriber;
use crate::wire;

#[async_trait]
impl ConntrackHandler for ClassifierSubscriber {
    async fn handle_conntrack(
        &self,
        _session: Option<&Arc<Session>>,
        entry: &Arc<ConntrackEntry>,
        event: ConntrackEventKind,
    ) {
        let ctid = entry.conntrack_id;
        if !self.socket.is_connected().await {
            // No DPI engine to tell yet; it gets a CREATE-free view of
            // whatever flows are already active once it connects.
            return;
        }

        let frame = match event {
            ConntrackEventKind::New => {
                let tuple = entry.client_side_tuple;
                wire::create_frame(ctid, tuple.protocol, tuple.client_addr, tuple.client_port, tuple.server_addr, tuple.server_port)
            }
            ConntrackEventKind::Delete => wire::remove_frame(ctid),
            ConntrackEventKind::Update => return,
        };
        if let Err(e) = self.socket.send_frame(&frame).await {
            log::debug!("classifier lifecycle frame for ctid {ctid} failed: {e}");
        }
    }
}
