//! Range-containment whitelist validation (ARINC 839 §1.2.2.2).
//!
//! A literal string match is insufficient: the request's 5-tuple ranges
//! must be *contained within* some whitelist entry's ranges, not equal to
//! one. See spec §4.1 and §8 invariant 1.

use crate::ip_range::IpRange;
use crate::port_range::PortRange;
use crate::tft::{Direction, TftRule};
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("TFT string is malformed: {0}")]
    Malformed(String),
    #[error(
        "TFT request not contained in any whitelist entry \
         (src_ip={src_ip:?} dst_ip={dst_ip:?} proto={proto:?} \
         src_port={src_port:?} dst_port={dst_port:?})"
    )]
    NotContained {
        src_ip: IpRange,
        dst_ip: IpRange,
        proto: Option<u8>,
        src_port: PortRange,
        dst_port: PortRange,
    },
}

/// Does `entry` (already parsed from a whitelist string) contain `req`?
fn entry_contains(req: &TftRule, entry: &TftRule) -> bool {
    let protocol_ok = match (req.protocol, entry.protocol) {
        (_, None) => true,
        (Some(rp), Some(ep)) => rp == ep,
        (None, Some(_)) => false,
    };
    protocol_ok
        && req.src_ip_range.contained_in(&entry.src_ip_range)
        && req.dst_ip_range.contained_in(&entry.dst_ip_range)
        && (entry.src_port_range.is_any() || req.src_port_range.contained_in(&entry.src_port_range))
        && (entry.dst_port_range.is_any() || req.dst_port_range.contained_in(&entry.dst_port_range))
}

/// Validate a client-supplied TFT string against a list of whitelist entry
/// strings (each itself a TFT-form string, without a direction prefix
/// requirement — whitelist entries may omit it).
pub fn validate_tft(requested: &str, whitelist: &[String]) -> Result<TftRule, ValidationError> {
    let req = TftRule::parse(requested).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    validate_parsed_tft(&req, whitelist)
}

pub fn validate_parsed_tft(req: &TftRule, whitelist: &[String]) -> Result<TftRule, ValidationError> {
    for entry_str in whitelist {
        let entry = match parse_whitelist_entry(entry_str) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry_contains(req, &entry) {
            return Ok(req.clone());
        }
    }
    Err(ValidationError::NotContained {
        src_ip: req.src_ip_range,
        dst_ip: req.dst_ip_range,
        proto: req.protocol,
        src_port: req.src_port_range,
        dst_port: req.dst_port_range,
    })
}

/// Whitelist entries carry no direction prefix; parse the bare field list.
fn parse_whitelist_entry(s: &str) -> Result<TftRule, crate::tft::TftParseError> {
    if let Ok(r) = TftRule::parse(s) {
        return Ok(r);
    }
    TftRule::parse_fields(Direction::ToGround, s)
}

/// Validate a NAPT rule's transformed (post-translation) destination
/// against the client's explicit dest-ip/port/protocol whitelist ranges
/// (spec §4.1: "NAPT validation is structurally the same on the
/// transformed 5-tuple").
pub fn validate_napt(
    rule: &crate::napt::NaptRule,
    link_ip: Ipv4Addr,
    dest_ip_range: (Ipv4Addr, Ipv4Addr),
    dest_port_range: (u16, u16),
    allowed_protocols: &[u8],
) -> Result<(), ValidationError> {
    let (dst_ip, dst_port) = rule.transformed_destination(link_ip);
    let whitelist_ip = IpRange::from_start_end(dest_ip_range.0, dest_ip_range.1)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    let whitelist_port = PortRange::new(dest_port_range.0, dest_port_range.1)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;

    let protocol_ok = allowed_protocols.is_empty()
        || rule
            .protocol
            .map(|p| allowed_protocols.contains(&p))
            .unwrap_or(false);

    if protocol_ok
        && dst_ip.contained_in(&whitelist_ip)
        && (whitelist_port.is_any() || dst_port.contained_in(&whitelist_port))
    {
        Ok(())
    } else {
        Err(ValidationError::NotContained {
            src_ip: IpRange::ANY,
            dst_ip,
            proto: rule.protocol,
            src_port: PortRange::ANY,
            dst_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_containment_accepts_subset() {
        let whitelist =
            vec!["_iTFT=,,,192.168.0.0.255.255.255.0,10.2.2.0.255.255.255.0,6,0.65535,0.65535".to_string()];
        let req = "_iTFT=,,,192.168.0.10.255.255.255.255,10.2.2.50.255.255.255.255,6,80.80,1024.65535";
        assert!(validate_tft(req, &whitelist).is_ok());
    }

    #[test]
    fn seed_s3_rejects_port_outside_whitelist() {
        // whitelist dst_port_range = 80-8080 (80.8080), request dst_port = 9000.9000
        let whitelist =
            vec!["_iTFT=,,,0.0.0.0.0.0.0.0,0.0.0.0.0.0.0.0,6,80.8080,0.65535".to_string()];
        let req = "_iTFT=,,,0.0.0.0.0.0.0.0,0.0.0.0.0.0.0.0,6,9000.9000,0.65535";
        let err = validate_tft(req, &whitelist).unwrap_err();
        assert!(matches!(err, ValidationError::NotContained { .. }));
    }

    #[test]
    fn protocol_mismatch_rejected_unless_whitelist_any() {
        let whitelist = vec!["_iTFT=,,,0.0.0.0.0.0.0.0,0.0.0.0.0.0.0.0,17,,".to_string()];
        let req = "_iTFT=,,,0.0.0.0.0.0.0.0,0.0.0.0.0.0.0.0,6,,";
        assert!(validate_tft(req, &whitelist).is_err());
    }

    #[test]
    fn any_whitelist_entry_accepts_anything() {
        let whitelist = vec!["_iTFT=,,,,,,,".to_string()];
        let req = "_iTFT=,,,192.168.5.5.255.255.255.255,8.8.8.8.255.255.255.255,6,443.443,1024.1024";
        assert!(validate_tft(req, &whitelist).is_ok());
    }

    #[test]
    fn containment_is_monotonic_repeat_validation_stable() {
        let whitelist =
            vec!["_iTFT=,,,192.168.0.0.255.255.255.0,10.2.2.0.255.255.255.0,6,0.65535,0.65535".to_string()];
        let req = "_iTFT=,,,192.168.0.10.255.255.255.255,10.2.2.50.255.255.255.255,6,80.80,1024.65535";
        assert!(validate_tft(req, &whitelist).is_ok());
        assert!(validate_tft(req, &whitelist).is_ok());
    }
}
