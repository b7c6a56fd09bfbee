//! Conntrack NEW/UPDATE/DELETE handling and the conntrack subscriber fan-out.

use std::sync::Arc;

use crate::conntrack::ConntrackEntry;
use crate::error::DispatchError;
use crate::packet::Family;
use crate::registry::ConntrackHandler;
use crate::session::Session;
use crate::tuple::Tuple;
use crate::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConntrackEventKind {
    New,
    Update,
    Delete,
}

impl Dispatcher {
    /// Handles one conntrack event.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_conntrack(
        &self,
        ctid: u32,
        conn_mark: u32,
        _family: Family,
        event: ConntrackEventKind,
        orig_tuple: Tuple,
        nat_tuple: Tuple,
        c2s_bytes: u64,
        s2c_bytes: u64,
    ) -> Result<(), DispatchError> {
        let (entry, session) = match event {
            ConntrackEventKind::New => {
                let entry = self.handle_new(ctid, conn_mark, orig_tuple, nat_tuple, c2s_bytes, s2c_bytes)?;
                let session = entry.session();
                (entry, session)
            }
            ConntrackEventKind::Update => {
                let entry = self.handle_update(ctid, conn_mark, c2s_bytes, s2c_bytes)?;
                let session = entry.session();
                (entry, session)
            }
            ConntrackEventKind::Delete => self.handle_delete(ctid, orig_tuple)?,
        };

        self.dispatch_conntrack_subscribers(session, entry, event)
            .await;
        Ok(())
    }

    fn handle_new(
        &self,
        ctid: u32,
        conn_mark: u32,
        orig_tuple: Tuple,
        nat_tuple: Tuple,
        c2s_bytes: u64,
        s2c_bytes: u64,
    ) -> Result<Arc<ConntrackEntry>, DispatchError> {
        if self.conntracks.find(&ctid).is_some() {
            log::error!("conntrack NEW for ctid {ctid} which is already present");
            return Err(DispatchError::ConntrackAlreadyPresent(ctid));
        }

        let session = self.sessions.find(&ctid);
        let session_id = match &session {
            Some(session) => {
                if session.client_side_tuple != orig_tuple {
                    log::error!("conntrack NEW tuple mismatch for ctid {ctid}");
                    return Err(DispatchError::ConntrackTupleMismatch(ctid));
                }
                session.set_server_side_tuple(nat_tuple);
                session.confirm_conntrack();
                session.session_id
            }
            None => self.id_alloc.next(),
        };

        let entry = Arc::new(ConntrackEntry::new(
            ctid,
            conn_mark,
            orig_tuple,
            nat_tuple,
            session_id,
            c2s_bytes,
            s2c_bytes,
        ));
        if let Some(session) = &session {
            entry.link_session(session);
            session.link_conntrack(&entry);
        }
        self.conntracks.insert(ctid, entry.clone(), "conntrack");
        Ok(entry)
    }

    fn handle_update(
        &self,
        ctid: u32,
        conn_mark: u32,
        c2s_bytes: u64,
        s2c_bytes: u64,
    ) -> Result<Arc<ConntrackEntry>, DispatchError> {
        let entry = match self.conntracks.find(&ctid) {
            Some(entry) => entry,
            None => {
                log::debug!("conntrack UPDATE for unknown ctid {ctid}");
                return Err(DispatchError::ConntrackUnknownOnUpdate(ctid));
            }
        };
        let mark_changed = entry.apply_update(conn_mark, c2s_bytes, s2c_bytes);
        if mark_changed {
            log::debug!("ctid {ctid}: conn mark changed to {conn_mark:#x}");
        }
        Ok(entry)
    }

    fn handle_delete(
        &self,
        ctid: u32,
        orig_tuple: Tuple,
    ) -> Result<(Arc<ConntrackEntry>, Option<Arc<Session>>), DispatchError> {
        let entry = match self.conntracks.find(&ctid) {
            Some(entry) => entry,
            None => {
                log::error!("conntrack DELETE for unknown ctid {ctid}");
                return Err(DispatchError::ConntrackUnknownOnDelete(ctid));
            }
        };
        if entry.client_side_tuple != orig_tuple {
            log::error!("conntrack DELETE tuple mismatch for ctid {ctid}");
            return Err(DispatchError::ConntrackDeleteTupleMismatch(ctid));
        }
        self.conntracks.remove(&ctid);

        let session = entry.session();
        if let Some(session) = &session {
            if session.client_side_tuple == entry.client_side_tuple {
                self.sessions.remove_if_same(&ctid, session);
            }
        }
        Ok((entry, session))
    }

    async fn dispatch_conntrack_subscribers(
        &self,
        session: Option<Arc<Session>>,
        entry: Arc<ConntrackEntry>,
        event: ConntrackEventKind,
    ) {
        let handles = self.registry.mirror_conntrack();
        if handles.is_empty() {
            return;
        }

        super::for_each_wave(handles, move |handler| {
            let session = session.clone();
            let entry = entry.clone();
            async move { handler.handle_conntrack(session.as_ref(), &entry, event).await }
        })
        .await;
    }
}
