//! The per-client session state machine (spec §4.5).
//!
//! ```text
//! IDLE ──MCAR(auth only)──▶ AUTHENTICATED
//! IDLE ──MCAR(auth + Comm-Req)──▶ AUTHENTICATED ──▶ ACTIVE    [0-RTT]
//! AUTHENTICATED ──MCCR(start, granted>0)──▶ ACTIVE
//! AUTHENTICATED ──MCCR(start, no bw, keep=1)──▶ QUEUED
//! ACTIVE ──MCCR(modify)──▶ ACTIVE
//! ACTIVE ──MCCR(stop)──▶ AUTHENTICATED
//! ACTIVE | AUTHENTICATED | QUEUED ──STR──▶ TERMINATING
//! ```

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Authenticating,
    Authenticated,
    Active,
    Queued,
    Terminating,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsmError {
    #[error("illegal transition from {from:?} via {event}")]
    IllegalTransition { from: SessionState, event: &'static str },
}

/// Client subscription level (AVP 10002/10003), spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusLevel {
    None = 0,
    Magic = 1,
    Dlm = 2,
    MagicDlm = 3,
    DlmLink = 6,
    All = 7,
}

impl StatusLevel {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(StatusLevel::None),
            1 => Some(StatusLevel::Magic),
            2 => Some(StatusLevel::Dlm),
            3 => Some(StatusLevel::MagicDlm),
            6 => Some(StatusLevel::DlmLink),
            7 => Some(StatusLevel::All),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Does a subscription at `self` cover an event published at `published`?
    /// `All` covers everything; `MagicDlm` covers `Magic` and `Dlm`;
    /// otherwise only an exact match.
    pub fn covers(self, published: StatusLevel) -> bool {
        match self {
            StatusLevel::All => true,
            StatusLevel::MagicDlm => matches!(published, StatusLevel::Magic | StatusLevel::Dlm | StatusLevel::MagicDlm),
            other => other == published,
        }
    }
}

/// One installed TFT rule bound to a session, tracking the dataplane
/// handle needed to remove it on teardown/modify (spec §8 invariant 4).
#[derive(Debug, Clone)]
pub struct BoundTftRule {
    pub handle: String,
    pub rule: magic_tft::TftRule,
    pub direction: magic_tft::Direction,
}

/// A parked MCCR, replayed verbatim once bandwidth frees up while the
/// session sits in QUEUED (spec §5 "Cancellation/timeout", seed S4).
#[derive(Debug, Clone, Default)]
pub struct QueuedGrant {
    pub profile_name: String,
    pub requested_bw_kbps: u32,
    pub qos_level: Option<u32>,
    pub tft_to_ground: Vec<String>,
    pub tft_to_aircraft: Vec<String>,
    pub napt_rules: Vec<String>,
    pub accounting_enabled: bool,
    pub timeout_s: Option<u32>,
}

/// A client's communication session: authentication plus the currently
/// granted bearer (if any).
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub session_id: String,
    pub client_id: String,
    pub state: SessionState,
    pub subscribe_level: StatusLevel,
    pub profile_name: Option<String>,
    pub granted_bw_kbps: u32,
    pub granted_ret_bw_kbps: u32,
    pub selected_link_id: Option<String>,
    pub tft_rules: Vec<BoundTftRule>,
    pub napt_rules: Vec<String>,
    pub keep_request: bool,
    pub accounting_enabled: bool,
    pub session_timeout_s: u32,
    pub last_activity_unix: u64,
    pub active_cdr_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub queued_grant: Option<QueuedGrant>,
}

impl ClientSession {
    pub fn new(session_id: impl Into<String>, client_id: impl Into<String>, now_unix: u64) -> Self {
        ClientSession {
            session_id: session_id.into(),
            client_id: client_id.into(),
            state: SessionState::Idle,
            subscribe_level: StatusLevel::None,
            profile_name: None,
            granted_bw_kbps: 0,
            granted_ret_bw_kbps: 0,
            selected_link_id: None,
            tft_rules: Vec::new(),
            napt_rules: Vec::new(),
            keep_request: false,
            accounting_enabled: false,
            session_timeout_s: 0,
            last_activity_unix: now_unix,
            active_cdr_id: None,
            metadata: BTreeMap::new(),
            queued_grant: None,
        }
    }

    /// MCAR succeeds with no Communication-Request-Parameters attached.
    pub fn authenticate(&mut self, subscribe_level: StatusLevel, now_unix: u64) -> Result<(), FsmError> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(FsmError::IllegalTransition { from: self.state, event: "MCAR" });
        }
        self.state = SessionState::Authenticated;
        self.subscribe_level = subscribe_level;
        self.last_activity_unix = now_unix;
        Ok(())
    }

    /// MCCR start with granted bandwidth > 0: AUTHENTICATED -> ACTIVE, or
    /// 0-RTT straight from IDLE (MCAR carrying a Comm-Req) via the caller
    /// first calling `authenticate`, then `start_active`.
    pub fn start_active(&mut self, granted_bw_kbps: u32, granted_ret_bw_kbps: u32, link_id: String, now_unix: u64) -> Result<(), FsmError> {
        if !matches!(self.state, SessionState::Authenticated | SessionState::Queued) {
            return Err(FsmError::IllegalTransition { from: self.state, event: "MCCR(start)" });
        }
        self.state = SessionState::Active;
        self.granted_bw_kbps = granted_bw_kbps;
        self.granted_ret_bw_kbps = granted_ret_bw_kbps;
        self.selected_link_id = Some(link_id);
        self.last_activity_unix = now_unix;
        self.queued_grant = None;
        Ok(())
    }

    /// MCCR start with no available path and `Keep-Request == 1`. Also
    /// used to re-park a session whose promotion attempt failed again, so
    /// QUEUED -> QUEUED is allowed.
    pub fn queue(&mut self, now_unix: u64) -> Result<(), FsmError> {
        if !matches!(self.state, SessionState::Authenticated | SessionState::Queued) {
            return Err(FsmError::IllegalTransition { from: self.state, event: "MCCR(queue)" });
        }
        self.state = SessionState::Queued;
        self.last_activity_unix = now_unix;
        Ok(())
    }

    /// MCCR modify: must already be ACTIVE.
    pub fn modify_active(&mut self, granted_bw_kbps: u32, granted_ret_bw_kbps: u32, now_unix: u64) -> Result<(), FsmError> {
        if !matches!(self.state, SessionState::Active) {
            return Err(FsmError::IllegalTransition { from: self.state, event: "MCCR(modify)" });
        }
        self.granted_bw_kbps = granted_bw_kbps;
        self.granted_ret_bw_kbps = granted_ret_bw_kbps;
        self.last_activity_unix = now_unix;
        Ok(())
    }

    /// MCCR stop (requested bandwidth == 0): ACTIVE -> AUTHENTICATED.
    pub fn stop_active(&mut self, now_unix: u64) -> Result<(), FsmError> {
        if !matches!(self.state, SessionState::Active | SessionState::Queued) {
            return Err(FsmError::IllegalTransition { from: self.state, event: "MCCR(stop)" });
        }
        self.state = SessionState::Authenticated;
        self.granted_bw_kbps = 0;
        self.granted_ret_bw_kbps = 0;
        self.selected_link_id = None;
        self.tft_rules.clear();
        self.last_activity_unix = now_unix;
        self.queued_grant = None;
        Ok(())
    }

    /// Server-initiated link-lost push: ACTIVE -> AUTHENTICATED (MNTR
    /// LINK_ERROR follows from the caller).
    pub fn link_lost(&mut self, now_unix: u64) -> Result<(), FsmError> {
        if !matches!(self.state, SessionState::Active) {
            return Err(FsmError::IllegalTransition { from: self.state, event: "link_lost" });
        }
        self.state = SessionState::Authenticated;
        self.selected_link_id = None;
        self.tft_rules.clear();
        self.last_activity_unix = now_unix;
        Ok(())
    }

    /// Server-initiated link switch: stays ACTIVE, new link id recorded
    /// (MNTR FORCED_REROUTING follows from the caller).
    pub fn switch_link(&mut self, new_link_id: String, now_unix: u64) -> Result<(), FsmError> {
        if !matches!(self.state, SessionState::Active) {
            return Err(FsmError::IllegalTransition { from: self.state, event: "link_switch" });
        }
        self.selected_link_id = Some(new_link_id);
        self.last_activity_unix = now_unix;
        Ok(())
    }

    /// STR: any non-terminal state -> TERMINATING.
    pub fn terminate(&mut self) -> Result<(), FsmError> {
        if matches!(self.state, SessionState::Terminating) {
            return Err(FsmError::IllegalTransition { from: self.state, event: "STR" });
        }
        self.state = SessionState::Terminating;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Terminating)
    }

    pub fn touch(&mut self, now_unix: u64) {
        self.last_activity_unix = now_unix;
    }

    pub fn is_timed_out(&self, now_unix: u64) -> bool {
        self.session_timeout_s > 0 && now_unix.saturating_sub(self.last_activity_unix) >= self.session_timeout_s as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rtt_auth_then_active() {
        let mut s = ClientSession::new("sess_1", "CLIENT_A", 1000);
        s.authenticate(StatusLevel::All, 1000).unwrap();
        s.start_active(5000, 2000, "LINK_WIFI".into(), 1001).unwrap();
        assert_eq!(s.state, SessionState::Active);
        assert_eq!(s.granted_bw_kbps, 5000);
    }

    #[test]
    fn queue_then_promote_to_active() {
        let mut s = ClientSession::new("sess_1", "CLIENT_A", 1000);
        s.authenticate(StatusLevel::None, 1000).unwrap();
        s.queue(1000).unwrap();
        assert_eq!(s.state, SessionState::Queued);
        s.start_active(1000, 0, "LINK_SATCOM".into(), 1010).unwrap();
        assert_eq!(s.state, SessionState::Active);
    }

    #[test]
    fn stop_from_active_returns_to_authenticated_and_clears_bearer() {
        let mut s = ClientSession::new("sess_1", "CLIENT_A", 1000);
        s.authenticate(StatusLevel::None, 1000).unwrap();
        s.start_active(1000, 0, "LINK_WIFI".into(), 1000).unwrap();
        s.stop_active(1050).unwrap();
        assert_eq!(s.state, SessionState::Authenticated);
        assert_eq!(s.granted_bw_kbps, 0);
        assert!(s.selected_link_id.is_none());
    }

    #[test]
    fn illegal_start_from_idle_is_rejected() {
        let mut s = ClientSession::new("sess_1", "CLIENT_A", 1000);
        assert!(s.start_active(1000, 0, "LINK_WIFI".into(), 1000).is_err());
    }

    #[test]
    fn terminate_is_reachable_from_every_non_terminal_state() {
        for setup in [SessionState::Idle, SessionState::Authenticated, SessionState::Active, SessionState::Queued] {
            let mut s = ClientSession::new("sess_1", "CLIENT_A", 1000);
            s.state = setup;
            s.terminate().unwrap();
            assert_eq!(s.state, SessionState::Terminating);
        }
    }

    #[test]
    fn status_level_coverage() {
        assert!(StatusLevel::All.covers(StatusLevel::DlmLink));
        assert!(StatusLevel::MagicDlm.covers(StatusLevel::Dlm));
        assert!(!StatusLevel::Magic.covers(StatusLevel::Dlm));
    }

    #[test]
    fn session_timeout_after_inactivity() {
        let mut s = ClientSession::new("sess_1", "CLIENT_A", 1000);
        s.session_timeout_s = 30;
        s.touch(1000);
        assert!(!s.is_timed_out(1020));
        assert!(s.is_timed_out(1031));
    }
}
