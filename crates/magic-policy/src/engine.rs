//! Path selection: flight-phase ruleset lookup, scoring, and PROHIBIT
//! short-circuiting (spec §4.4).

use std::collections::HashMap;

use magic_common::model::{FlightPhase, Link, PathAction, PolicyRuleSet, TrafficClass};

/// One candidate path considered during selection, with its computed score
/// (0 if prohibited or the link is down).
#[derive(Debug, Clone)]
pub struct RankedPath {
    pub link_id: String,
    pub ranking: u8,
    pub score: f64,
    pub available: bool,
}

/// Outcome of a path-selection pass for one session/request.
#[derive(Debug, Clone)]
pub struct PathSelectionDecision {
    pub selected_link_id: Option<String>,
    pub ranked_paths: Vec<RankedPath>,
    pub reason: String,
    pub is_valid: bool,
}

impl PathSelectionDecision {
    fn invalid(reason: impl Into<String>) -> Self {
        PathSelectionDecision {
            selected_link_id: None,
            ranked_paths: Vec::new(),
            reason: reason.into(),
            is_valid: false,
        }
    }
}

/// Weighted score for one available, permitted link (spec §4.4 step 3).
fn score_link(ranking: u8, link: &Link) -> f64 {
    let available_bw_kbps = link.available_bw_kbps() as f64;
    let rtt_ms = link.dynamic.rtt_ms as f64;
    let cost_index = link.capabilities.cost_index as f64;
    let load_percent = link.load_percent();
    let loss_rate = link.dynamic.loss_rate as f64;

    10000.0
        + (10.0 - ranking as f64) * 2000.0
        + (available_bw_kbps / 1000.0)
        + (1000.0 - rtt_ms).max(0.0)
        + (100.0 - cost_index) * 50.0
        + (100.0 - load_percent) * 20.0
        + (1.0 - loss_rate) * 1000.0
}

/// Select a path for `traffic_class` given the ruleset active for
/// `current_phase` and the live link map (keyed by `link_id`).
///
/// Ruleset lookup, rule matching, and PROHIBIT handling follow spec §4.4
/// steps 1-4 exactly; `ALL_TRAFFIC` is consulted only when no class-specific
/// rule exists ([`PolicyRuleSet::rule_for`]).
pub fn select_path(
    rule_sets: &[PolicyRuleSet],
    current_phase: FlightPhase,
    traffic_class: TrafficClass,
    links: &HashMap<String, Link>,
) -> PathSelectionDecision {
    let rule_set = match rule_sets.iter().find(|rs| rs.phases.contains(&current_phase)) {
        Some(rs) => rs,
        None => return PathSelectionDecision::invalid(format!("no policy ruleset covers phase {current_phase:?}")),
    };

    let rule = match rule_set.rule_for(traffic_class) {
        Some(r) => r,
        None => {
            return PathSelectionDecision::invalid(format!(
                "no rule for traffic class {traffic_class:?} and no ALL_TRAFFIC fallback in phase {current_phase:?}"
            ))
        }
    };

    let mut ranked = Vec::with_capacity(rule.paths.len());
    for pref in &rule.paths {
        let link = links.get(&pref.link_id);
        let prohibited = pref.action == PathAction::Prohibit;
        let down = link.map(|l| !l.dynamic.is_up).unwrap_or(true);

        let (score, available) = if prohibited || down {
            (0.0, false)
        } else {
            let link = link.expect("checked above: link present when not down");
            (score_link(pref.ranking, link), true)
        };

        ranked.push(RankedPath {
            link_id: pref.link_id.clone(),
            ranking: pref.ranking,
            score,
            available,
        });
    }

    // Manual scan rather than Iterator::max_by: on a tie we want the
    // *earliest* listed preference to win, and max_by's last-wins tie
    // behavior would give the opposite.
    let mut best: Option<(usize, &RankedPath)> = None;
    for (idx, path) in ranked.iter().enumerate() {
        if !path.available {
            continue;
        }
        best = match best {
            Some((_, current)) if current.score >= path.score => best,
            _ => Some((idx, path)),
        };
    }

    match best {
        Some((_, winner)) => {
            let reason = format!("selected {} (score {:.1})", winner.link_id, winner.score);
            let selected_link_id = Some(winner.link_id.clone());
            PathSelectionDecision {
                selected_link_id,
                ranked_paths: ranked,
                reason,
                is_valid: true,
            }
        }
        None => PathSelectionDecision {
            selected_link_id: None,
            ranked_paths: ranked,
            reason: "no available, permitted link in rule".to_string(),
            is_valid: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magic_common::model::{Coverage, LinkCapabilities, LinkDynamicState, PathPreference, PolicyRule};
    use std::net::Ipv4Addr;

    fn link(id: &str, up: bool, max_bw: u32, load: u32, rtt: u32, cost: u8, loss: f32) -> Link {
        Link {
            link_id: id.to_string(),
            interface_name: "eth0".into(),
            dlm_driver_id: id.to_string(),
            assigned_id: 1,
            capabilities: LinkCapabilities {
                max_tx_rate_kbps: max_bw,
                typical_latency_ms: rtt,
                cost_index: cost,
                security_level: 1,
                coverage: Coverage::Global,
                priority: 5,
            },
            dynamic: LinkDynamicState {
                is_up: up,
                current_load_kbps: load,
                rtt_ms: rtt,
                loss_rate: loss,
                ip_address: Ipv4Addr::new(10, 0, 0, 1),
                ..Default::default()
            },
        }
    }

    fn ruleset(phase: FlightPhase, rules: Vec<PolicyRule>) -> PolicyRuleSet {
        PolicyRuleSet {
            phases: vec![phase],
            rules,
        }
    }

    #[test]
    fn seed_s1_prefers_wifi_when_ranked_first_and_up() {
        let mut links = HashMap::new();
        links.insert("LINK_WIFI".to_string(), link("LINK_WIFI", true, 20000, 1000, 20, 5, 0.0));
        links.insert("LINK_SATCOM".to_string(), link("LINK_SATCOM", true, 2048, 0, 600, 80, 0.01));

        let rs = ruleset(
            FlightPhase::Parked,
            vec![PolicyRule {
                traffic_class: TrafficClass::BulkData,
                paths: vec![
                    PathPreference {
                        ranking: 1,
                        link_id: "LINK_WIFI".to_string(),
                        action: PathAction::Permit,
                        security_required: None,
                    },
                    PathPreference {
                        ranking: 2,
                        link_id: "LINK_SATCOM".to_string(),
                        action: PathAction::Permit,
                        security_required: None,
                    },
                ],
            }],
        );

        let decision = select_path(&[rs], FlightPhase::Parked, TrafficClass::BulkData, &links);
        assert!(decision.is_valid);
        assert_eq!(decision.selected_link_id.as_deref(), Some("LINK_WIFI"));
    }

    #[test]
    fn seed_s2_prohibit_forces_satcom_in_cruise() {
        let mut links = HashMap::new();
        links.insert("LINK_WIFI".to_string(), link("LINK_WIFI", true, 20000, 1000, 20, 5, 0.0));
        links.insert("LINK_SATCOM".to_string(), link("LINK_SATCOM", true, 2048, 0, 600, 80, 0.01));

        let rs = ruleset(
            FlightPhase::Cruise,
            vec![PolicyRule {
                traffic_class: TrafficClass::BulkData,
                paths: vec![
                    PathPreference {
                        ranking: 1,
                        link_id: "LINK_WIFI".to_string(),
                        action: PathAction::Prohibit,
                        security_required: None,
                    },
                    PathPreference {
                        ranking: 1,
                        link_id: "LINK_SATCOM".to_string(),
                        action: PathAction::Permit,
                        security_required: None,
                    },
                ],
            }],
        );

        let decision = select_path(&[rs], FlightPhase::Cruise, TrafficClass::BulkData, &links);
        assert!(decision.is_valid);
        assert_eq!(decision.selected_link_id.as_deref(), Some("LINK_SATCOM"));
        let wifi = decision.ranked_paths.iter().find(|p| p.link_id == "LINK_WIFI").unwrap();
        assert_eq!(wifi.score, 0.0);
        assert!(!wifi.available);
    }

    #[test]
    fn down_link_scores_zero_even_if_permitted() {
        let mut links = HashMap::new();
        links.insert("LINK_DOWN".to_string(), link("LINK_DOWN", false, 1000, 0, 10, 5, 0.0));

        let rs = ruleset(
            FlightPhase::Taxi,
            vec![PolicyRule {
                traffic_class: TrafficClass::CabinOperations,
                paths: vec![PathPreference {
                    ranking: 1,
                    link_id: "LINK_DOWN".to_string(),
                    action: PathAction::Permit,
                    security_required: None,
                }],
            }],
        );

        let decision = select_path(&[rs], FlightPhase::Taxi, TrafficClass::CabinOperations, &links);
        assert!(!decision.is_valid);
        assert!(decision.selected_link_id.is_none());
    }

    #[test]
    fn missing_ruleset_for_phase_is_invalid() {
        let decision = select_path(&[], FlightPhase::Landing, TrafficClass::BulkData, &HashMap::new());
        assert!(!decision.is_valid);
    }

    #[test]
    fn ties_broken_by_earlier_preference_order() {
        // Identical link characteristics but different rankings produce different
        // scores (the preference-weight term dominates), so an exact tie only
        // arises from equal rankings; verify the earlier-listed entry wins then.
        let mut links = HashMap::new();
        links.insert("A".to_string(), link("A", true, 1000, 0, 10, 5, 0.0));
        links.insert("B".to_string(), link("B", true, 1000, 0, 10, 5, 0.0));

        let rs = ruleset(
            FlightPhase::Cruise,
            vec![PolicyRule {
                traffic_class: TrafficClass::AcarsComms,
                paths: vec![
                    PathPreference {
                        ranking: 1,
                        link_id: "A".to_string(),
                        action: PathAction::Permit,
                        security_required: None,
                    },
                    PathPreference {
                        ranking: 1,
                        link_id: "B".to_string(),
                        action: PathAction::Permit,
                        security_required: None,
                    },
                ],
            }],
        );

        let decision = select_path(&[rs], FlightPhase::Cruise, TrafficClass::AcarsComms, &links);
        assert_eq!(decision.selected_link_id.as_deref(), Some("A"));
    }
}
