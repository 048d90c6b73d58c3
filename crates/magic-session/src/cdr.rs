//! Charging Data Record accounting (spec §3, §4.5 MADR/MACR).
//!
//! A CDR tracks one session's billing period. `restart` (MACR) closes the
//! current record and opens a fresh one atomically, which is the only way
//! a CDR moves out of `Active` in this gateway — nothing here forwards a
//! CDR out-of-band, so `Forwarded`/`Unknown` only appear via external
//! injection (kept for the MADR `list` surface's completeness).

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdrState {
    Active,
    Finished,
    Forwarded,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Cdr {
    pub cdr_id: String,
    pub session_id: String,
    pub state: CdrState,
    pub started_unix: u64,
    pub stopped_unix: Option<u64>,
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CdrError {
    #[error("no active CDR for session {0}")]
    NoActiveCdr(String),
    #[error("CDR id not found: {0}")]
    UnknownCdrId(String),
}

/// Encodes a closed CDR's billing content: session id, start/stop unix
/// timestamps, ASCII — matching the original's plain-text CDR body.
fn render_content(session_id: &str, started_unix: u64, stopped_unix: u64) -> Vec<u8> {
    format!("session={session_id};start={started_unix};stop={stopped_unix}").into_bytes()
}

#[derive(Default)]
pub struct CdrLedger {
    records: Mutex<HashMap<String, Cdr>>,
    active_by_session: Mutex<HashMap<String, String>>,
}

impl CdrLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new ACTIVE CDR for `session_id`. Panics-free: a session can
    /// only ever have one active CDR, enforced by the caller never
    /// re-opening without first closing.
    pub fn open(&self, session_id: &str, cdr_id: String, now_unix: u64) {
        let cdr = Cdr {
            cdr_id: cdr_id.clone(),
            session_id: session_id.to_string(),
            state: CdrState::Active,
            started_unix: now_unix,
            stopped_unix: None,
            content: None,
        };
        self.records.lock().unwrap().insert(cdr_id.clone(), cdr);
        self.active_by_session.lock().unwrap().insert(session_id.to_string(), cdr_id);
    }

    /// Close the session's active CDR: ACTIVE -> FINISHED, content rendered.
    pub fn close(&self, session_id: &str, now_unix: u64) -> Result<String, CdrError> {
        let cdr_id = self
            .active_by_session
            .lock()
            .unwrap()
            .remove(session_id)
            .ok_or_else(|| CdrError::NoActiveCdr(session_id.to_string()))?;
        let mut records = self.records.lock().unwrap();
        let cdr = records.get_mut(&cdr_id).ok_or_else(|| CdrError::UnknownCdrId(cdr_id.clone()))?;
        cdr.state = CdrState::Finished;
        cdr.stopped_unix = Some(now_unix);
        cdr.content = Some(render_content(session_id, cdr.started_unix, now_unix));
        Ok(cdr_id)
    }

    /// MACR restart: close the current CDR, open a fresh one, return
    /// `(stopped_cdr_id, started_cdr_id)` — the `Start-Stop-Pair`.
    pub fn restart(&self, session_id: &str, new_cdr_id: String, now_unix: u64) -> Result<(String, String), CdrError> {
        let stopped = self.close(session_id, now_unix)?;
        self.open(session_id, new_cdr_id.clone(), now_unix);
        Ok((stopped, new_cdr_id))
    }

    pub fn get(&self, cdr_id: &str) -> Option<Cdr> {
        self.records.lock().unwrap().get(cdr_id).cloned()
    }

    pub fn list_by_state(&self, state: CdrState) -> Vec<Cdr> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.state == state)
            .cloned()
            .collect()
    }

    pub fn active_cdr_id(&self, session_id: &str) -> Option<String> {
        self.active_by_session.lock().unwrap().get(session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_close_moves_to_finished() {
        let ledger = CdrLedger::new();
        ledger.open("sess_1", "cdr_1".into(), 1000);
        assert_eq!(ledger.list_by_state(CdrState::Active).len(), 1);
        ledger.close("sess_1", 1100).unwrap();
        assert_eq!(ledger.list_by_state(CdrState::Active).len(), 0);
        assert_eq!(ledger.list_by_state(CdrState::Finished).len(), 1);
        let cdr = ledger.get("cdr_1").unwrap();
        assert_eq!(cdr.stopped_unix, Some(1100));
        assert!(cdr.content.is_some());
    }

    #[test]
    fn restart_closes_old_and_opens_new_atomically() {
        let ledger = CdrLedger::new();
        ledger.open("sess_1", "cdr_1".into(), 1000);
        let (stopped, started) = ledger.restart("sess_1", "cdr_2".into(), 1200).unwrap();
        assert_eq!(stopped, "cdr_1");
        assert_eq!(started, "cdr_2");
        assert_eq!(ledger.active_cdr_id("sess_1"), Some("cdr_2".to_string()));
        assert_eq!(ledger.get("cdr_1").unwrap().state, CdrState::Finished);
        assert_eq!(ledger.get("cdr_2").unwrap().state, CdrState::Active);
    }

    #[test]
    fn close_without_active_cdr_is_an_error() {
        let ledger = CdrLedger::new();
        assert!(ledger.close("sess_unknown", 1000).is_err());
    }
}
