//! Per-packet entry point: resolve a session for the packet's ctid and fan
//! it out to nfqueue subscribers.

use std::sync::Arc;

use crate::bypass;
use crate::mark::PacketMark;
use crate::packet::{self, Family, ParsedPacket, TCP_FLAG_FIN, TCP_FLAG_RST};
use crate::registry::NfqueueHandler;
use crate::session::Session;
use crate::tuple::Tuple;
use crate::Dispatcher;

/// The kernel verdict for a packet. DROP is reserved; this core never
/// issues it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
}

impl Dispatcher {
    /// Handles one NFQUEUE packet.
    pub async fn on_packet(&self, ctid: u32, family: Family, buf: &[u8], packet_mark: u32) -> Verdict {
        let length = buf.len() as u64;

        let parsed = match packet::parse_layers(buf, family) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("ctid {ctid}: discarding unparseable packet: {e}");
                return Verdict::Accept;
            }
        };

        let hints = PacketMark::decode(packet_mark);
        let msg_tuple = Tuple::new(parsed.protocol, parsed.src, parsed.src_port, parsed.dst, parsed.dst_port);

        let existing = self.sessions.find(&ctid);

        let (session, just_created) = match (existing, hints.is_new_session) {
            (None, false) => {
                self.log_missed_first_packet(ctid, &parsed);
                bypass::bypass_via_dictionary(&*self.session_dict, ctid);
                return Verdict::Accept;
            }
            (None, true) => (self.create_session(ctid, msg_tuple, family, length), true),
            (Some(existing), true) if existing.client_side_tuple == msg_tuple => (existing, false),
            (Some(existing), true) => {
                log::debug!("ctid {ctid}: new-session mark with a different tuple, replacing session {}", existing.session_id);
                self.sessions.remove_if_same(&ctid, &existing);
                (self.create_session(ctid, msg_tuple, family, length), true)
            }
            (Some(existing), false) => (existing, false),
        };

        if session.conntrack_id != ctid {
            log::error!(
                "ctid {ctid}: resolved session {} belongs to ctid {}",
                session.session_id,
                session.conntrack_id
            );
        }

        let client_to_server = parsed.src == session.client_side_tuple.client_addr;
        if client_to_server {
            session.set_client_interface_if_unset(hints.interface_id, hints.interface_type);
        } else {
            session.set_server_interface_if_unset(hints.interface_id, hints.interface_type);
        }

        if !just_created {
            session.record_packet(length);
        }

        self.dispatch_nfqueue_subscribers(ctid, &session, &parsed, client_to_server)
            .await;

        Verdict::Accept
    }

    fn log_missed_first_packet(&self, ctid: u32, parsed: &ParsedPacket<'_>) {
        let is_rst_or_fin = parsed
            .tcp_flags
            .map(|f| f & (TCP_FLAG_RST | TCP_FLAG_FIN) != 0)
            .unwrap_or(false);
        if is_rst_or_fin {
            log::debug!("ctid {ctid}: missed first packet (RST/FIN observed), bypassing");
        } else {
            log::info!("ctid {ctid}: missed first packet, bypassing");
        }
    }

    fn create_session(&self, ctid: u32, tuple: Tuple, family: Family, length: u64) -> Arc<Session> {
        let session_id = self.id_alloc.next();
        let snapshot = self.registry.mirror_nfqueue();
        let session = Arc::new(Session::new(session_id, ctid, tuple, family, length, snapshot));
        // ctid reuse ahead of the conntrack DELETE event for the old entry.
        self.conntracks.remove(&ctid);
        self.sessions.insert(ctid, session.clone(), "session");
        session
    }

    async fn dispatch_nfqueue_subscribers(
        &self,
        ctid: u32,
        session: &Arc<Session>,
        parsed: &ParsedPacket<'_>,
        client_to_server: bool,
    ) {
        let handles = session.subscriptions_snapshot();
        if handles.is_empty() {
            bypass::bypass_via_dictionary(&*self.session_dict, ctid);
            return;
        }

        let parsed = parsed.clone();
        let session_for_call = Arc::clone(session);
        let outcomes = super::for_each_wave_timeout(
            handles,
            self.nfqueue_handler_timeout,
            &self.rate_limiter,
            move |handler: Arc<dyn NfqueueHandler>| {
                let session = Arc::clone(&session_for_call);
                let parsed = parsed.clone();
                async move { handler.handle_packet(&session, &parsed, client_to_server).await }
            },
        )
        .await;

        for (owner, outcome) in outcomes {
            let should_release = match outcome {
                None => {
                    log::log!(log::Level::Error, "handler '{owner}' missed its nfqueue deadline, releasing on its behalf");
                    true
                }
                Some(outcome) => outcome.release,
            };
            if should_release {
                bypass::release(&*self.session_dict, session, ctid, &owner);
            }
        }
    }
}
