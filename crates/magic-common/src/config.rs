//! Static gateway configuration.
//!
//! `MagicConfig` is the parsed value the orchestrator is constructed with.
//! The core never re-reads disk (spec §6): whoever assembles a `MagicConfig`
//! — whether from the aircraft's XML profiles (external, out of scope) or
//! from a TOML file for local/test runs — hands it over once at startup.

use crate::model::{ClientProfile, PolicyRuleSet};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static per-link profile as registered out-of-band (mirrors the fields a
/// DLM announces over IPC at `REGISTER` time, spec §4.3/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatalinkProfile {
    pub link_id: String,
    pub dlm_driver_id: String,
    pub interface_name: String,
    pub max_tx_rate_kbps: u32,
    pub typical_latency_ms: u32,
    pub cost_index: u8,
    pub security_level: u8,
    pub coverage: crate::model::Coverage,
    pub priority: u8,
}

/// Top-level static configuration handed to the gateway at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MagicConfig {
    pub link_profiles: Vec<DatalinkProfile>,
    pub client_profiles: Vec<ClientProfile>,
    pub policy_rule_sets: Vec<PolicyRuleSet>,
    /// CIDR subnet gating Layer B's global OUTPUT/FORWARD DROP (spec §9 —
    /// this MUST come from configuration, not be hard-coded).
    pub client_subnet_cidr: String,
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub diameter_request_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub status_snapshot_interval: Duration,
    pub origin_host: String,
}

impl MagicConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn find_client(&self, client_id: &str) -> Option<&ClientProfile> {
        self.client_profiles.iter().find(|c| c.client_id == client_id)
    }

    pub fn find_client_by_username(&self, username: &str) -> Option<&ClientProfile> {
        self.client_profiles.iter().find(|c| match &c.auth {
            crate::model::ClientAuth::MagicAware { username: u, .. } => u == username,
            _ => false,
        })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let cfg = MagicConfig {
            link_profiles: vec![],
            client_profiles: vec![],
            policy_rule_sets: vec![],
            client_subnet_cidr: "192.168.126.0/24".into(),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            diameter_request_timeout: Duration::from_secs(30),
            status_snapshot_interval: Duration::from_secs(30),
            origin_host: "magic-core.aircraft".into(),
        };
        let s = toml::to_string(&cfg).unwrap();
        let back = MagicConfig::from_toml_str(&s).unwrap();
        assert_eq!(back.client_subnet_cidr, "192.168.126.0/24");
        assert_eq!(back.heartbeat_timeout, Duration::from_secs(30));
    }
}
