//! The process-wide session table: one entry per client session, guarded
//! individually so concurrent Diameter RX workers don't serialize on
//! unrelated sessions (spec §5 locking order: `session_mgr → dlm_registry
//! → dataplane`).

use std::sync::Mutex;

use dashmap::DashMap;
use thiserror::Error;

use crate::fsm::ClientSession;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionTableError {
    #[error("unknown session id: {0}")]
    UnknownSession(String),
    #[error("session id already in use: {0}")]
    DuplicateSession(String),
}

#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, Mutex<ClientSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: ClientSession) -> Result<(), SessionTableError> {
        let id = session.session_id.clone();
        if self.sessions.contains_key(&id) {
            return Err(SessionTableError::DuplicateSession(id));
        }
        self.sessions.insert(id, Mutex::new(session));
        Ok(())
    }

    /// Run `f` against the session under its own lock, without holding the
    /// table-wide lock for longer than the dashmap shard lookup.
    pub fn with_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ClientSession) -> R,
    ) -> Result<R, SessionTableError> {
        let entry = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SessionTableError::UnknownSession(session_id.to_string()))?;
        let mut guard = entry.lock().unwrap();
        Ok(f(&mut guard))
    }

    pub fn remove(&self, session_id: &str) -> Result<(), SessionTableError> {
        self.sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| SessionTableError::UnknownSession(session_id.to_string()))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Snapshot-copy every session, holding each per-session lock only
    /// briefly (spec §5: "iteration holds the table lock only for
    /// snapshot-copy").
    pub fn snapshot(&self) -> Vec<ClientSession> {
        self.sessions
            .iter()
            .map(|entry| entry.value().lock().unwrap().clone())
            .collect()
    }

    /// Session ids currently bound to `link_id` — used by the orchestrator
    /// when a link goes down or policy re-selection is needed.
    pub fn sessions_on_link(&self, link_id: &str) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .lock()
                    .unwrap()
                    .selected_link_id
                    .as_deref()
                    == Some(link_id)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn timed_out_sessions(&self, now_unix: u64) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().lock().unwrap().is_timed_out(now_unix))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::StatusLevel;

    #[test]
    fn insert_then_lookup_and_mutate() {
        let table = SessionTable::new();
        table.insert(ClientSession::new("sess_1", "CLIENT_A", 1000)).unwrap();
        table
            .with_session("sess_1", |s| s.authenticate(StatusLevel::All, 1000).unwrap())
            .unwrap();
        let snap = table.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].subscribe_level, StatusLevel::All);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let table = SessionTable::new();
        table.insert(ClientSession::new("sess_1", "CLIENT_A", 1000)).unwrap();
        assert!(table.insert(ClientSession::new("sess_1", "CLIENT_B", 1000)).is_err());
    }

    #[test]
    fn unknown_session_lookup_is_an_error() {
        let table = SessionTable::new();
        assert!(table.with_session("sess_missing", |_| ()).is_err());
    }

    #[test]
    fn sessions_on_link_filters_by_selected_link() {
        let table = SessionTable::new();
        let mut s1 = ClientSession::new("sess_1", "CLIENT_A", 1000);
        s1.authenticate(StatusLevel::None, 1000).unwrap();
        s1.start_active(1000, 0, "LINK_WIFI".into(), 1000).unwrap();
        table.insert(s1).unwrap();
        let mut s2 = ClientSession::new("sess_2", "CLIENT_B", 1000);
        s2.authenticate(StatusLevel::None, 1000).unwrap();
        s2.start_active(1000, 0, "LINK_SATCOM".into(), 1000).unwrap();
        table.insert(s2).unwrap();

        assert_eq!(table.sessions_on_link("LINK_WIFI"), vec!["sess_1".to_string()]);
    }
}
