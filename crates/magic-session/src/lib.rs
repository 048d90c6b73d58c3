//! C5 — the session table, per-client FSM, and CDR accounting.

pub mod cdr;
pub mod fsm;
pub mod table;

pub use cdr::{Cdr, CdrError, CdrLedger, CdrState};
pub use fsm::{BoundTftRule, ClientSession, FsmError, QueuedGrant, SessionState, StatusLevel};
pub use table::{SessionTable, SessionTableError};
