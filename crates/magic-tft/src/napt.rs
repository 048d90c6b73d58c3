//! ARINC 839 NAPT (Network Address & Port Translation) rule parsing.
//!
//! Wire form: `<NAT-Type>,<Source-IP>,<Destination-IP>,<IP-Protocol>,
//! <Destination-Port>,<Source-Port>,<to-IP>,<to-Port>` — eight
//! comma-separated fields. The `%LinkIp%` placeholder stands for the
//! selected link's IP address and is resolved by the caller once a link is
//! chosen (it cannot be resolved at parse time).

use crate::ip_range::IpRange;
use crate::port_range::PortRange;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NaptParseError {
    #[error("expected 8 comma-separated NAPT fields, found {0}")]
    WrongFieldCount(usize),
    #[error("unknown NAT type: {0}")]
    UnknownNatType(String),
    #[error("malformed address field: {0}")]
    MalformedAddress(String),
    #[error("malformed port field: {0}")]
    MalformedPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    /// Source address translation — client source IP replaced by the
    /// link's egress IP.
    Snat,
    /// Destination address translation — destination IP/port replaced by
    /// the real server address.
    Dnat,
}

/// An address field that may be the literal `%LinkIp%` placeholder,
/// resolved once a link has been selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrField {
    Resolved(Ipv4Addr),
    LinkIp,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaptRule {
    pub nat_type: NatType,
    pub source_ip: AddrField,
    pub destination_ip: AddrField,
    pub protocol: Option<u8>,
    pub destination_port: PortRange,
    pub source_port: PortRange,
    pub to_ip: AddrField,
    pub to_port: PortRange,
}

fn parse_addr_field(s: &str) -> Result<AddrField, NaptParseError> {
    if s.is_empty() {
        return Ok(AddrField::Any);
    }
    if s == "%LinkIp%" {
        return Ok(AddrField::LinkIp);
    }
    s.parse::<Ipv4Addr>()
        .map(AddrField::Resolved)
        .map_err(|_| NaptParseError::MalformedAddress(s.to_string()))
}

fn parse_port_field(s: &str) -> Result<PortRange, NaptParseError> {
    if s.is_empty() {
        return Ok(PortRange::ANY);
    }
    if let Some((lo, hi)) = s.split_once('.') {
        let lo: u16 = lo.parse().map_err(|_| NaptParseError::MalformedPort(s.to_string()))?;
        let hi: u16 = hi.parse().map_err(|_| NaptParseError::MalformedPort(s.to_string()))?;
        PortRange::new(lo, hi).map_err(|_| NaptParseError::MalformedPort(s.to_string()))
    } else {
        let p: u16 = s.parse().map_err(|_| NaptParseError::MalformedPort(s.to_string()))?;
        Ok(PortRange::single(p))
    }
}

impl NaptRule {
    pub fn parse(s: &str) -> Result<Self, NaptParseError> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != 8 {
            return Err(NaptParseError::WrongFieldCount(fields.len()));
        }
        let nat_type = match fields[0] {
            "SNAT" => NatType::Snat,
            "DNAT" => NatType::Dnat,
            other => return Err(NaptParseError::UnknownNatType(other.to_string())),
        };
        let protocol_field = fields[3];
        let protocol = if protocol_field.is_empty() {
            None
        } else {
            Some(
                protocol_field
                    .parse::<u8>()
                    .map_err(|_| NaptParseError::MalformedAddress(protocol_field.to_string()))?,
            )
        };
        Ok(NaptRule {
            nat_type,
            source_ip: parse_addr_field(fields[1])?,
            destination_ip: parse_addr_field(fields[2])?,
            protocol,
            destination_port: parse_port_field(fields[4])?,
            source_port: parse_port_field(fields[5])?,
            to_ip: parse_addr_field(fields[6])?,
            to_port: parse_port_field(fields[7])?,
        })
    }

    /// Resolve the transformed (post-NAT) destination the value to check
    /// against the whitelist. Per spec §4.1, NAPT validation checks the
    /// destination as it appears *after* translation.
    pub fn transformed_destination(&self, link_ip: Ipv4Addr) -> (IpRange, PortRange) {
        let ip = match &self.to_ip {
            AddrField::Resolved(ip) => IpRange::single(*ip),
            AddrField::LinkIp => IpRange::single(link_ip),
            AddrField::Any => IpRange::ANY,
        };
        (ip, self.to_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snat_with_link_ip_placeholder() {
        let s = "SNAT,192.168.126.10,,6,,,%LinkIp%,";
        let rule = NaptRule::parse(s).unwrap();
        assert_eq!(rule.nat_type, NatType::Snat);
        assert_eq!(rule.to_ip, AddrField::LinkIp);
        assert_eq!(rule.protocol, Some(6));
    }

    #[test]
    fn parses_dnat_with_port_range() {
        let s = "DNAT,,203.0.113.5,6,8080,,10.0.0.5,80.80";
        let rule = NaptRule::parse(s).unwrap();
        assert_eq!(rule.nat_type, NatType::Dnat);
        assert_eq!(rule.to_port, PortRange::new(80, 80).unwrap());
    }

    #[test]
    fn rejects_unknown_nat_type() {
        assert!(NaptRule::parse("FOO,,,,,,,").is_err());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(NaptRule::parse("SNAT,,,").is_err());
    }

    #[test]
    fn transformed_destination_resolves_link_ip() {
        let rule = NaptRule::parse("SNAT,192.168.126.10,,6,,,%LinkIp%,5000.5000").unwrap();
        let (ip, port) = rule.transformed_destination(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ip, IpRange::single(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(port, PortRange::new(5000, 5000).unwrap());
    }
}
