//! Core data model shared across the gateway (spec §3).

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Coverage envelope of a physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Global,
    Terrestrial,
    GateOnly,
}

/// Static capabilities of a link, fixed at DLM registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCapabilities {
    pub max_tx_rate_kbps: u32,
    pub typical_latency_ms: u32,
    /// 1 (cheapest) .. 100 (most expensive).
    pub cost_index: u8,
    pub security_level: u8,
    pub coverage: Coverage,
    /// 1 (lowest) .. 10 (highest).
    pub priority: u8,
}

/// Dynamic, frequently-updated state of a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDynamicState {
    pub is_up: bool,
    pub current_bw_kbps: u32,
    pub current_latency_ms: u32,
    pub rtt_ms: u32,
    /// 0.0 .. 1.0
    pub loss_rate: f32,
    pub current_load_kbps: u32,
    pub last_heartbeat_unix: u64,
    pub ip_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl Default for LinkDynamicState {
    fn default() -> Self {
        Self {
            is_up: false,
            current_bw_kbps: 0,
            current_latency_ms: 0,
            rtt_ms: 0,
            loss_rate: 0.0,
            current_load_kbps: 0,
            last_heartbeat_unix: 0,
            ip_address: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// A DLM-registered link. Invariant: `current_bw_kbps <= max_tx_rate_kbps`;
/// `is_up => ip_address != 0.0.0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub link_id: String,
    pub interface_name: String,
    pub dlm_driver_id: String,
    pub assigned_id: u32,
    pub capabilities: LinkCapabilities,
    pub dynamic: LinkDynamicState,
}

impl Link {
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.dynamic.current_bw_kbps > self.capabilities.max_tx_rate_kbps {
            return Err(format!(
                "link {}: current_bw_kbps {} exceeds max_tx_rate_kbps {}",
                self.link_id, self.dynamic.current_bw_kbps, self.capabilities.max_tx_rate_kbps
            ));
        }
        if self.dynamic.is_up && self.dynamic.ip_address.is_unspecified() {
            return Err(format!(
                "link {}: is_up but ip_address is unspecified",
                self.link_id
            ));
        }
        Ok(())
    }

    /// Percentage of `max_tx_rate_kbps` currently consumed, 0..100.
    pub fn load_percent(&self) -> f64 {
        if self.capabilities.max_tx_rate_kbps == 0 {
            return 100.0;
        }
        (self.dynamic.current_load_kbps as f64 / self.capabilities.max_tx_rate_kbps as f64) * 100.0
    }

    /// Bandwidth not yet committed to existing sessions.
    pub fn available_bw_kbps(&self) -> u32 {
        self.capabilities
            .max_tx_rate_kbps
            .saturating_sub(self.dynamic.current_load_kbps)
    }
}

/// Flight phase, process-wide mutable, single-writer (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightPhase {
    Parked,
    Taxi,
    Takeoff,
    Climb,
    Cruise,
    Oceanic,
    Descent,
    Approach,
    Landing,
}

/// Traffic class a session is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficClass {
    FlightCritical,
    CockpitData,
    CabinOperations,
    PassengerEntertainment,
    BulkData,
    AcarsComms,
    AllTraffic,
}

/// Whether a [`PathPreference`] permits or forbids a link for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathAction {
    Permit,
    Prohibit,
}

/// A single ranked candidate link within a [`PolicyRule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPreference {
    /// 1 (best) .. 10 (worst).
    pub ranking: u8,
    pub link_id: String,
    pub action: PathAction,
    pub security_required: Option<u8>,
}

/// One traffic class's ordered list of candidate links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub traffic_class: TrafficClass,
    pub paths: Vec<PathPreference>,
}

/// A rule set scoped to one or more flight phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRuleSet {
    pub phases: Vec<FlightPhase>,
    pub rules: Vec<PolicyRule>,
}

impl PolicyRuleSet {
    /// Find the rule matching `class` exactly, falling back to
    /// `ALL_TRAFFIC` only if no class-specific rule exists.
    pub fn rule_for(&self, class: TrafficClass) -> Option<&PolicyRule> {
        self.rules
            .iter()
            .find(|r| r.traffic_class == class)
            .or_else(|| {
                if class == TrafficClass::AllTraffic {
                    None
                } else {
                    self.rules
                        .iter()
                        .find(|r| r.traffic_class == TrafficClass::AllTraffic)
                }
            })
    }
}

/// How a client authenticates to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientAuth {
    MagicAware {
        username: String,
        /// Argon2id password hash.
        password_hash: String,
    },
    NonAware {
        source_ip: Ipv4Addr,
        dest_ip: Ipv4Addr,
        dest_port_list: Vec<u16>,
    },
}

/// Per-client traffic-filter whitelist (ARINC 839 §1.2.2.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSecurityConfig {
    pub allowed_tfts: Vec<String>,
    pub dest_ip_range: (Ipv4Addr, Ipv4Addr),
    pub dest_port_range: (u16, u16),
    pub source_port_range: (u16, u16),
    pub allowed_protocols: Vec<u8>,
}

/// Per-client bandwidth/session limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientLimits {
    pub max_session_bw_kbps: u32,
    pub total_client_bw_kbps: u32,
    pub max_concurrent_sessions: u32,
}

/// A statically configured client, loaded at startup and read-only
/// thereafter (spec §3, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientProfile {
    pub client_id: String,
    pub auth: ClientAuth,
    pub whitelist: TrafficSecurityConfig,
    pub limits: ClientLimits,
    /// Classifies the client into a [`TrafficClass`] (spec §4.5 step 2).
    pub system_role: TrafficClass,
    pub metadata: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(bw: u32, max: u32, up: bool, ip: Ipv4Addr) -> Link {
        Link {
            link_id: "LINK_TEST".into(),
            interface_name: "eth0".into(),
            dlm_driver_id: "DLM_TEST".into(),
            assigned_id: 1000,
            capabilities: LinkCapabilities {
                max_tx_rate_kbps: max,
                typical_latency_ms: 50,
                cost_index: 10,
                security_level: 1,
                coverage: Coverage::Global,
                priority: 5,
            },
            dynamic: LinkDynamicState {
                is_up: up,
                current_bw_kbps: bw,
                ip_address: ip,
                ..Default::default()
            },
        }
    }

    #[test]
    fn invariant_bw_within_max() {
        let l = link(100, 50, true, Ipv4Addr::new(10, 0, 0, 1));
        assert!(l.check_invariants().is_err());
    }

    #[test]
    fn invariant_up_requires_ip() {
        let l = link(10, 50, true, Ipv4Addr::UNSPECIFIED);
        assert!(l.check_invariants().is_err());
    }

    #[test]
    fn invariant_ok() {
        let l = link(10, 50, true, Ipv4Addr::new(10, 0, 0, 1));
        assert!(l.check_invariants().is_ok());
    }

    #[test]
    fn rule_lookup_prefers_exact_class() {
        let rs = PolicyRuleSet {
            phases: vec![FlightPhase::Cruise],
            rules: vec![
                PolicyRule {
                    traffic_class: TrafficClass::BulkData,
                    paths: vec![],
                },
                PolicyRule {
                    traffic_class: TrafficClass::AllTraffic,
                    paths: vec![],
                },
            ],
        };
        assert_eq!(
            rs.rule_for(TrafficClass::BulkData).unwrap().traffic_class,
            TrafficClass::BulkData
        );
        assert_eq!(
            rs.rule_for(TrafficClass::AcarsComms).unwrap().traffic_class,
            TrafficClass::AllTraffic
        );
    }

    #[test]
    fn rule_lookup_none_when_no_match_and_no_all_traffic() {
        let rs = PolicyRuleSet {
            phases: vec![FlightPhase::Cruise],
            rules: vec![PolicyRule {
                traffic_class: TrafficClass::BulkData,
                paths: vec![],
            }],
        };
        assert!(rs.rule_for(TrafficClass::AcarsComms).is_none());
    }
}
