//! C3 — the DLM registry: link table, assignment, and heartbeat/liveness
//! scanning. Mutex-protected per spec §4.3 ("each exposed operation takes
//! the registry's own lock for its duration, never across an I/O await").

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use magic_common::model::{Coverage, Link, LinkCapabilities, LinkDynamicState};

/// Error raised by a registry operation referencing an unknown link/DLM.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no link registered for DLM {0}")]
    UnknownDlm(String),
    #[error("link {0} is not registered")]
    UnknownLink(String),
}

fn coverage_from_wire(v: u8) -> Coverage {
    match v {
        2 => Coverage::Terrestrial,
        3 => Coverage::GateOnly,
        _ => Coverage::Global,
    }
}

/// Registry state for one DLM-registered link: the shared model plus the
/// bookkeeping the registry itself needs (last heartbeat, dlm_id mapping).
struct RegisteredLink {
    link: Link,
    dlm_id: String,
    last_heartbeat_unix: Mutex<u64>,
}

/// The live link table. Cheap to clone (wraps `Arc`-like `DashMap`s), safe
/// to share across the IPC server's per-connection tasks.
pub struct DlmRegistry {
    links: DashMap<String, RegisteredLink>,
    dlm_to_link: DashMap<String, String>,
    next_assigned_id: AtomicU32,
}

impl Default for DlmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DlmRegistry {
    pub fn new() -> Self {
        DlmRegistry {
            links: DashMap::new(),
            dlm_to_link: DashMap::new(),
            next_assigned_id: AtomicU32::new(1000),
        }
    }

    /// Register a link from a DLM's `MSG_TYPE_REGISTER`, returning the
    /// assigned link id. Re-registration of an already-known DLM replaces
    /// its static capabilities and keeps the same assigned id.
    pub fn register_link(
        &self,
        dlm_id: &str,
        link_profile_id: &str,
        iface_name: &str,
        cost_index: u32,
        max_bw_kbps: u32,
        typical_latency_ms: u32,
        priority: u8,
        coverage: u8,
        now_unix: u64,
    ) -> u32 {
        if let Some(existing_id) = self.dlm_to_link.get(dlm_id).map(|e| e.clone()) {
            if let Some(mut entry) = self.links.get_mut(&existing_id) {
                entry.link.capabilities = LinkCapabilities {
                    max_tx_rate_kbps: max_bw_kbps,
                    typical_latency_ms,
                    cost_index: cost_index.min(100) as u8,
                    security_level: entry.link.capabilities.security_level,
                    coverage: coverage_from_wire(coverage),
                    priority,
                };
                *entry.last_heartbeat_unix.lock().unwrap() = now_unix;
                return entry.link.assigned_id;
            }
        }

        let assigned_id = self.next_assigned_id.fetch_add(1, Ordering::SeqCst);
        let link = Link {
            link_id: link_profile_id.to_string(),
            interface_name: iface_name.to_string(),
            dlm_driver_id: dlm_id.to_string(),
            assigned_id,
            capabilities: LinkCapabilities {
                max_tx_rate_kbps: max_bw_kbps,
                typical_latency_ms,
                cost_index: cost_index.min(100) as u8,
                security_level: 1,
                coverage: coverage_from_wire(coverage),
                priority,
            },
            dynamic: LinkDynamicState::default(),
        };
        self.links.insert(
            link_profile_id.to_string(),
            RegisteredLink {
                link,
                dlm_id: dlm_id.to_string(),
                last_heartbeat_unix: Mutex::new(now_unix),
            },
        );
        self.dlm_to_link.insert(dlm_id.to_string(), link_profile_id.to_string());
        assigned_id
    }

    /// Apply a `MSG_TYPE_LINK_EVENT` to the link owned by `dlm_id`.
    pub fn update_link_dynamic_state(
        &self,
        dlm_id: &str,
        dynamic: LinkDynamicState,
    ) -> Result<(), RegistryError> {
        let link_id = self
            .dlm_to_link
            .get(dlm_id)
            .map(|e| e.clone())
            .ok_or_else(|| RegistryError::UnknownDlm(dlm_id.to_string()))?;
        let mut entry = self
            .links
            .get_mut(&link_id)
            .ok_or_else(|| RegistryError::UnknownLink(link_id.clone()))?;
        entry.link.dynamic = dynamic;
        Ok(())
    }

    /// Record a heartbeat's arrival time for liveness tracking.
    pub fn record_heartbeat(&self, dlm_id: &str, now_unix: u64) -> Result<(), RegistryError> {
        let link_id = self
            .dlm_to_link
            .get(dlm_id)
            .map(|e| e.clone())
            .ok_or_else(|| RegistryError::UnknownDlm(dlm_id.to_string()))?;
        let entry = self
            .links
            .get(&link_id)
            .ok_or_else(|| RegistryError::UnknownLink(link_id.clone()))?;
        *entry.last_heartbeat_unix.lock().unwrap() = now_unix;
        Ok(())
    }

    pub fn get_link_snapshot(&self, link_id: &str) -> Option<Link> {
        self.links.get(link_id).map(|e| e.link.clone())
    }

    pub fn iterate_links(&self) -> Vec<Link> {
        self.links.iter().map(|e| e.link.clone()).collect()
    }

    /// Mark a DLM's link down and remove it from routing consideration
    /// (socket disconnect, or called by the heartbeat scanner on timeout).
    pub fn mark_link_down(&self, dlm_id: &str) -> Option<String> {
        let link_id = self.dlm_to_link.get(dlm_id).map(|e| e.clone())?;
        if let Some(mut entry) = self.links.get_mut(&link_id) {
            entry.link.dynamic.is_up = false;
        }
        Some(link_id)
    }

    /// Heartbeat-timeout scan (spec §4.3: 3x heartbeat interval). Returns
    /// the ids of links newly marked down by this call.
    pub fn scan_heartbeat_timeouts(&self, now_unix: u64, timeout_s: u64) -> Vec<String> {
        let mut newly_down = Vec::new();
        for entry in self.links.iter() {
            let last = *entry.last_heartbeat_unix.lock().unwrap();
            if entry.link.dynamic.is_up && now_unix.saturating_sub(last) > timeout_s {
                newly_down.push(entry.link.link_id.clone());
            }
        }
        for link_id in &newly_down {
            if let Some(mut entry) = self.links.get_mut(link_id) {
                entry.link.dynamic.is_up = false;
            }
        }
        newly_down
    }

    pub fn dlm_id_for_link(&self, link_id: &str) -> Option<String> {
        self.links.get(link_id).map(|e| e.dlm_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_by_link_id() {
        let reg = DlmRegistry::new();
        let id = reg.register_link("DLM_SATCOM", "LINK_SATCOM", "eth1", 90, 2048, 600, 5, 1, 1000);
        assert!(id >= 1000);
        let link = reg.get_link_snapshot("LINK_SATCOM").unwrap();
        assert_eq!(link.capabilities.max_tx_rate_kbps, 2048);
        assert_eq!(link.capabilities.coverage, Coverage::Global);
    }

    #[test]
    fn reregistration_keeps_assigned_id() {
        let reg = DlmRegistry::new();
        let id1 = reg.register_link("DLM_WIFI", "LINK_WIFI", "eth0", 5, 20000, 20, 8, 2, 1000);
        let id2 = reg.register_link("DLM_WIFI", "LINK_WIFI", "eth0", 5, 25000, 15, 8, 2, 1100);
        assert_eq!(id1, id2);
        assert_eq!(reg.get_link_snapshot("LINK_WIFI").unwrap().capabilities.max_tx_rate_kbps, 25000);
    }

    #[test]
    fn link_event_updates_dynamic_state() {
        let reg = DlmRegistry::new();
        reg.register_link("DLM_WIFI", "LINK_WIFI", "eth0", 5, 20000, 20, 8, 2, 1000);
        reg.update_link_dynamic_state(
            "DLM_WIFI",
            LinkDynamicState {
                is_up: true,
                current_bw_kbps: 15000,
                ..Default::default()
            },
        )
        .unwrap();
        let link = reg.get_link_snapshot("LINK_WIFI").unwrap();
        assert!(link.dynamic.is_up);
        assert_eq!(link.dynamic.current_bw_kbps, 15000);
    }

    #[test]
    fn unknown_dlm_is_an_error() {
        let reg = DlmRegistry::new();
        assert!(reg.update_link_dynamic_state("DLM_GHOST", LinkDynamicState::default()).is_err());
    }

    #[test]
    fn heartbeat_timeout_marks_link_down() {
        let reg = DlmRegistry::new();
        reg.register_link("DLM_SATCOM", "LINK_SATCOM", "eth1", 90, 2048, 600, 5, 1, 1000);
        reg.update_link_dynamic_state(
            "DLM_SATCOM",
            LinkDynamicState {
                is_up: true,
                ..Default::default()
            },
        )
        .unwrap();
        reg.record_heartbeat("DLM_SATCOM", 1000).unwrap();

        let timed_out = reg.scan_heartbeat_timeouts(1031, 30);
        assert_eq!(timed_out, vec!["LINK_SATCOM".to_string()]);
        assert!(!reg.get_link_snapshot("LINK_SATCOM").unwrap().dynamic.is_up);
    }

    #[test]
    fn heartbeat_within_window_does_not_time_out() {
        let reg = DlmRegistry::new();
        reg.register_link("DLM_SATCOM", "LINK_SATCOM", "eth1", 90, 2048, 600, 5, 1, 1000);
        reg.update_link_dynamic_state(
            "DLM_SATCOM",
            LinkDynamicState {
                is_up: true,
                ..Default::default()
            },
        )
        .unwrap();
        reg.record_heartbeat("DLM_SATCOM", 1000).unwrap();
        assert!(reg.scan_heartbeat_timeouts(1020, 30).is_empty());
    }
}
