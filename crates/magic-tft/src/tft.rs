//! 3GPP TS 23.060 packet-filter ("TFT") string parsing.
//!
//! Surface syntax carries the direction in its prefix:
//! `_iTFT=<fields>` (aircraft → ground) or `+CGTFT=<fields>` (ground →
//! aircraft). Fields are comma-separated, left to right, with empty-field
//! semantics preserved:
//!
//! `{cid, pf_id, precedence, src_ip_and_mask, dst_ip_and_mask, protocol,
//!   dst_port_range, src_port_range, ipsec_spi, tos, flow_label}`
//!
//! Address/mask fields are eight dot-separated octets `a.b.c.d.m1.m2.m3.m4`;
//! port-range fields are `low.high` inclusive. Omitted fields default to
//! "any".

use crate::ip_range::IpRange;
use crate::port_range::PortRange;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TftParseError {
    #[error("TFT string missing direction prefix (_iTFT= or +CGTFT=): {0}")]
    MissingPrefix(String),
    #[error("malformed address/mask field {field}: {value}")]
    MalformedAddrMask { field: &'static str, value: String },
    #[error("malformed port range field {field}: {value}")]
    MalformedPortRange { field: &'static str, value: String },
    #[error("malformed protocol field: {0}")]
    MalformedProtocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `_iTFT=` — aircraft to ground.
    ToGround,
    /// `+CGTFT=` — ground to aircraft.
    ToAircraft,
}

/// A parsed 5-tuple packet filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftRule {
    pub direction: Direction,
    pub src_ip_range: IpRange,
    pub dst_ip_range: IpRange,
    pub src_port_range: PortRange,
    pub dst_port_range: PortRange,
    /// `None` means "any protocol".
    pub protocol: Option<u8>,
}

fn parse_addr_and_mask(field: &str, name: &'static str) -> Result<IpRange, TftParseError> {
    if field.is_empty() {
        return Ok(IpRange::ANY);
    }
    let octets: Vec<&str> = field.split('.').collect();
    if octets.len() != 8 {
        return Err(TftParseError::MalformedAddrMask {
            field: name,
            value: field.to_string(),
        });
    }
    let parse_octet = |s: &str| -> Result<u8, TftParseError> {
        s.parse().map_err(|_| TftParseError::MalformedAddrMask {
            field: name,
            value: field.to_string(),
        })
    };
    let addr = Ipv4Addr::new(
        parse_octet(octets[0])?,
        parse_octet(octets[1])?,
        parse_octet(octets[2])?,
        parse_octet(octets[3])?,
    );
    let mask = Ipv4Addr::new(
        parse_octet(octets[4])?,
        parse_octet(octets[5])?,
        parse_octet(octets[6])?,
        parse_octet(octets[7])?,
    );
    Ok(IpRange::from_addr_and_mask(addr, mask))
}

fn parse_port_range_field(field: &str, name: &'static str) -> Result<PortRange, TftParseError> {
    if field.is_empty() {
        return Ok(PortRange::ANY);
    }
    PortRange::parse_dotted(field).map_err(|_| TftParseError::MalformedPortRange {
        field: name,
        value: field.to_string(),
    })
}

impl TftRule {
    /// Parse a full `_iTFT=...` or `+CGTFT=...` string.
    pub fn parse(s: &str) -> Result<Self, TftParseError> {
        let (direction, rest) = if let Some(rest) = s.strip_prefix("_iTFT=") {
            (Direction::ToGround, rest)
        } else if let Some(rest) = s.strip_prefix("+CGTFT=") {
            (Direction::ToAircraft, rest)
        } else {
            return Err(TftParseError::MissingPrefix(s.to_string()));
        };
        Self::parse_fields(direction, rest)
    }

    /// Parse the comma-separated field list without a direction prefix
    /// (used for whitelist entries, which carry no direction).
    pub fn parse_fields(direction: Direction, rest: &str) -> Result<Self, TftParseError> {
        let fields: Vec<&str> = rest.split(',').collect();
        let get = |i: usize| -> &str { fields.get(i).copied().unwrap_or("") };

        let src_ip_range = parse_addr_and_mask(get(3), "src_ip_and_mask")?;
        let dst_ip_range = parse_addr_and_mask(get(4), "dst_ip_and_mask")?;
        let protocol_field = get(5);
        let protocol = if protocol_field.is_empty() {
            None
        } else {
            Some(
                protocol_field
                    .parse::<u8>()
                    .map_err(|_| TftParseError::MalformedProtocol(protocol_field.to_string()))?,
            )
        };
        let dst_port_range = parse_port_range_field(get(6), "dst_port_range")?;
        let src_port_range = parse_port_range_field(get(7), "src_port_range")?;

        Ok(TftRule {
            direction,
            src_ip_range,
            dst_ip_range,
            src_port_range,
            dst_port_range,
            protocol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seed_s1_filter() {
        let s = "_iTFT=,,,192.168.0.10.255.255.255.255,10.2.2.0.255.255.255.0,6,80.80,1024.65535";
        let rule = TftRule::parse(s).unwrap();
        assert_eq!(rule.direction, Direction::ToGround);
        assert_eq!(rule.protocol, Some(6));
        assert_eq!(rule.dst_port_range, PortRange::new(80, 80).unwrap());
        assert_eq!(rule.src_port_range, PortRange::new(1024, 65535).unwrap());
        assert_eq!(
            rule.src_ip_range,
            IpRange::single(Ipv4Addr::new(192, 168, 0, 10))
        );
        assert_eq!(
            rule.dst_ip_range,
            IpRange::from_addr_and_mask(
                Ipv4Addr::new(10, 2, 2, 0),
                Ipv4Addr::new(255, 255, 255, 0)
            )
        );
    }

    #[test]
    fn missing_fields_default_to_any() {
        let rule = TftRule::parse("_iTFT=").unwrap();
        assert!(rule.src_ip_range.is_any());
        assert!(rule.dst_ip_range.is_any());
        assert!(rule.src_port_range.is_any());
        assert!(rule.dst_port_range.is_any());
        assert_eq!(rule.protocol, None);
    }

    #[test]
    fn ground_to_aircraft_prefix() {
        let rule = TftRule::parse("+CGTFT=,,,,,,,").unwrap();
        assert_eq!(rule.direction, Direction::ToAircraft);
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(TftRule::parse(",,,,,,,").is_err());
    }

    #[test]
    fn any_boundary_values() {
        // protocol unspecified + dest port 0.65535 + dest ip 0.0.0.0.0.0.0.0 -> "any"
        let s = "_iTFT=,,,,0.0.0.0.0.0.0.0,,0.65535,";
        let rule = TftRule::parse(s).unwrap();
        assert!(rule.dst_ip_range.is_any());
        assert!(rule.dst_port_range.is_any());
        assert_eq!(rule.protocol, None);
    }
}
