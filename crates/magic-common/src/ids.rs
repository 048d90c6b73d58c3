//! Prefixed ID generation.
//!
//! Internal-facing ids use a `prefix_` followed by a UUIDv7 (time-ordered),
//! so they are globally unique, sortable by creation time, and instantly
//! identifiable by type in logs. The Diameter `Session-Id` itself follows
//! RFC 6733's `diameterIdentity;timestamp;counter` form and is produced
//! separately by [`session_id`].

use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a CDR id: `cdr_<uuid7>`
pub fn cdr_id() -> String {
    prefixed_id("cdr")
}

/// Generate an internal TFT/routing rule handle id: `rule_<uuid7>`
pub fn rule_id() -> String {
    prefixed_id("rule")
}

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Generate an RFC 6733 `diameterIdentity;timestamp;counter` Session-Id.
///
/// `origin_host` should be the gateway's Diameter identity
/// (e.g. `"magic-core.aircraft"`).
pub fn session_id(origin_host: &str, now_unix: u64) -> String {
    let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{origin_host};{now_unix};{counter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_correct_prefix() {
        assert!(cdr_id().starts_with("cdr_"));
        assert!(rule_id().starts_with("rule_"));
    }

    #[test]
    fn ids_are_unique() {
        let a = cdr_id();
        let b = cdr_id();
        assert_ne!(a, b);
    }

    #[test]
    fn session_ids_are_unique_and_well_formed() {
        let a = session_id("magic-core.aircraft", 1000);
        let b = session_id("magic-core.aircraft", 1000);
        assert_ne!(a, b);
        assert_eq!(a.matches(';').count(), 2);
        assert!(a.starts_with("magic-core.aircraft;1000;"));
    }
}
