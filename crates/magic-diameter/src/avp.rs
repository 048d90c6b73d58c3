//! AVP value model and RFC 6733 §4.1 wire codec.
//!
//! Each AVP is `Code(4) | Flags(1) | Length(3) | [Vendor-Id(4)] | Data | Padding`.
//! The `V` flag (vendor-specific) is always set for MAGIC's own AVPs and
//! clear for base-protocol AVPs; this codec mirrors the dictionary rather
//! than trusting the flag byte for dispatch.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::dictionary::is_grouped;

const FLAG_VENDOR: u8 = 0x80;
const FLAG_MANDATORY: u8 = 0x40;
const HEADER_LEN_NO_VENDOR: usize = 8;
const HEADER_LEN_VENDOR: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AvpCodecError {
    #[error("AVP header truncated: need at least 8 bytes, have {0}")]
    TruncatedHeader(usize),
    #[error("AVP {code} declares length {declared} but only {available} bytes remain")]
    TruncatedBody {
        code: u32,
        declared: usize,
        available: usize,
    },
    #[error("AVP {0} has non-Grouped data but dictionary marks it Grouped")]
    ExpectedGrouped(u32),
    #[error("AVP {0} integer payload has the wrong width for its declared length")]
    BadIntegerWidth(u32),
    #[error("AVP {0} string payload is not valid UTF-8")]
    BadUtf8(u32),
    #[error("AVP {0} address payload is not 4 bytes (IPv4 only)")]
    BadAddress(u32),
}

/// A leaf or grouped AVP value. MAGIC never needs the full Diameter
/// `AVP_FLOAT64`/`AVP_TIME` zoo; these variants cover what the dictionary
/// (`dictionary.rs`) actually uses.
#[derive(Debug, Clone, PartialEq)]
pub enum AvpValue {
    Unsigned32(u32),
    Integer32(i32),
    Float32(f32),
    Utf8String(String),
    OctetString(Vec<u8>),
    Address(Ipv4Addr),
    Enumerated(i32),
    Grouped(Vec<Avp>),
}

impl AvpValue {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            AvpValue::Unsigned32(v) => buf.put_u32(*v),
            AvpValue::Integer32(v) => buf.put_i32(*v),
            AvpValue::Float32(v) => buf.put_f32(*v),
            AvpValue::Enumerated(v) => buf.put_i32(*v),
            AvpValue::Utf8String(s) => buf.put_slice(s.as_bytes()),
            AvpValue::OctetString(b) => buf.put_slice(b),
            AvpValue::Address(ip) => {
                // Diameter Address format: 2-byte AddressType (1 = IPv4) + payload.
                buf.put_u16(1);
                buf.put_slice(&ip.octets());
            }
            AvpValue::Grouped(children) => {
                for child in children {
                    child.encode(buf);
                }
            }
        }
    }
}

/// One AVP, header plus value, with child AVPs inlined for `Grouped`.
#[derive(Debug, Clone, PartialEq)]
pub struct Avp {
    pub code: u32,
    pub vendor_id: Option<u32>,
    pub mandatory: bool,
    pub value: AvpValue,
}

impl Avp {
    pub fn vendor(code: u32, value: AvpValue) -> Self {
        Avp {
            code,
            vendor_id: Some(crate::dictionary::MAGIC_VENDOR_ID),
            mandatory: true,
            value,
        }
    }

    pub fn base(code: u32, value: AvpValue) -> Self {
        Avp {
            code,
            vendor_id: None,
            mandatory: true,
            value,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        self.value.encode(&mut body);

        let header_len = if self.vendor_id.is_some() {
            HEADER_LEN_VENDOR
        } else {
            HEADER_LEN_NO_VENDOR
        };
        let total_len = header_len + body.len();

        buf.put_u32(self.code);
        let mut flags = 0u8;
        if self.vendor_id.is_some() {
            flags |= FLAG_VENDOR;
        }
        if self.mandatory {
            flags |= FLAG_MANDATORY;
        }
        buf.put_u8(flags);
        buf.put_uint(total_len as u64, 3);
        if let Some(vid) = self.vendor_id {
            buf.put_u32(vid);
        }
        buf.put_slice(&body);

        let padding = (4 - (total_len % 4)) % 4;
        for _ in 0..padding {
            buf.put_u8(0);
        }
    }

    /// Decode one AVP from the front of `buf`, consuming the AVP and its
    /// padding. `hint` tells the decoder what shape the value should take;
    /// without an out-of-band dictionary, the raw bytes are ambiguous
    /// between integer/enumerated/octet-string for unfamiliar codes.
    pub fn decode(buf: &mut Bytes) -> Result<Self, AvpCodecError> {
        if buf.len() < 8 {
            return Err(AvpCodecError::TruncatedHeader(buf.len()));
        }
        let code = buf.get_u32();
        let flags = buf.get_u8();
        let length = buf.get_uint(3) as usize;
        let has_vendor = flags & FLAG_VENDOR != 0;
        let mandatory = flags & FLAG_MANDATORY != 0;

        let header_len = if has_vendor {
            HEADER_LEN_VENDOR
        } else {
            HEADER_LEN_NO_VENDOR
        };
        if length < header_len {
            return Err(AvpCodecError::TruncatedBody {
                code,
                declared: length,
                available: buf.len(),
            });
        }
        let vendor_id = if has_vendor {
            if buf.len() < 4 {
                return Err(AvpCodecError::TruncatedHeader(buf.len()));
            }
            Some(buf.get_u32())
        } else {
            None
        };

        let body_len = length - header_len;
        if buf.len() < body_len {
            return Err(AvpCodecError::TruncatedBody {
                code,
                declared: body_len,
                available: buf.len(),
            });
        }
        let body = buf.copy_to_bytes(body_len);

        let padding = (4 - (length % 4)) % 4;
        if buf.len() < padding {
            return Err(AvpCodecError::TruncatedBody {
                code,
                declared: padding,
                available: buf.len(),
            });
        }
        buf.advance(padding);

        let value = if is_grouped(code) {
            let mut children = Vec::new();
            let mut inner = body;
            while !inner.is_empty() {
                children.push(Avp::decode(&mut inner)?);
            }
            AvpValue::Grouped(children)
        } else {
            decode_leaf(code, &body)?
        };

        Ok(Avp {
            code,
            vendor_id,
            mandatory,
            value,
        })
    }

    /// Convenience accessor for a direct `Unsigned32`/`Enumerated` payload.
    pub fn as_u32(&self) -> Option<u32> {
        match &self.value {
            AvpValue::Unsigned32(v) => Some(*v),
            AvpValue::Enumerated(v) => Some(*v as u32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            AvpValue::Utf8String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&[Avp]> {
        match &self.value {
            AvpValue::Grouped(children) => Some(children),
            _ => None,
        }
    }

    pub fn find<'a>(group: &'a [Avp], code: u32) -> Option<&'a Avp> {
        group.iter().find(|a| a.code == code)
    }
}

/// Best-effort leaf decode: strings decode as UTF-8, 4-byte payloads as
/// Unsigned32 (MAGIC has no signed leaf AVPs in its simple-AVP range except
/// Float32, which callers reinterpret explicitly via `AvpValue::Float32`
/// construction on the encode side — round-tripping Float32 requires the
/// caller to know the code, same as libfdcore's dictionary-driven decode).
fn decode_leaf(code: u32, body: &[u8]) -> Result<AvpValue, AvpCodecError> {
    if body.len() == 4 {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(body);
        Ok(AvpValue::Unsigned32(u32::from_be_bytes(arr)))
    } else if body.len() == 6 && u16::from_be_bytes([body[0], body[1]]) == 1 {
        let ip = Ipv4Addr::new(body[2], body[3], body[4], body[5]);
        Ok(AvpValue::Address(ip))
    } else {
        std::str::from_utf8(body)
            .map(|s| AvpValue::Utf8String(s.to_string()))
            .map_err(|_| AvpCodecError::BadUtf8(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::avp;

    #[test]
    fn round_trips_unsigned32() {
        let a = Avp::vendor(avp::LINK_NUMBER, AvpValue::Unsigned32(7));
        let mut buf = BytesMut::new();
        a.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Avp::decode(&mut frozen).unwrap();
        assert_eq!(decoded.as_u32(), Some(7));
        assert_eq!(decoded.code, avp::LINK_NUMBER);
        assert!(frozen.is_empty());
    }

    #[test]
    fn round_trips_utf8_string_with_padding() {
        let a = Avp::vendor(avp::DLM_NAME, AvpValue::Utf8String("ka-band-1".to_string()));
        let mut buf = BytesMut::new();
        a.encode(&mut buf);
        assert_eq!(buf.len() % 4, 0);
        let mut frozen = buf.freeze();
        let decoded = Avp::decode(&mut frozen).unwrap();
        assert_eq!(decoded.as_str(), Some("ka-band-1"));
    }

    #[test]
    fn round_trips_grouped_avp() {
        let group = Avp::vendor(
            avp::DLM_INFO,
            AvpValue::Grouped(vec![
                Avp::vendor(avp::DLM_NAME, AvpValue::Utf8String("ka-1".to_string())),
                Avp::vendor(avp::LINK_NUMBER, AvpValue::Unsigned32(3)),
            ]),
        );
        let mut buf = BytesMut::new();
        group.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Avp::decode(&mut frozen).unwrap();
        let children = decoded.as_group().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(Avp::find(children, avp::LINK_NUMBER).unwrap().as_u32(), Some(3));
    }

    #[test]
    fn base_avp_has_no_vendor_id_and_shorter_header() {
        let a = Avp::base(crate::dictionary::base_avp::RESULT_CODE, AvpValue::Unsigned32(2001));
        let mut buf = BytesMut::new();
        a.encode(&mut buf);
        assert_eq!(buf.len(), 12); // 8-byte header + 4-byte value, no padding
        let mut frozen = buf.freeze();
        let decoded = Avp::decode(&mut frozen).unwrap();
        assert_eq!(decoded.vendor_id, None);
        assert_eq!(decoded.as_u32(), Some(2001));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut buf = Bytes::from_static(&[0, 0, 0, 1]);
        assert!(Avp::decode(&mut buf).is_err());
    }

    #[test]
    fn round_trips_address() {
        let a = Avp::vendor(avp::GATEWAY_IP, AvpValue::Address(Ipv4Addr::new(10, 0, 0, 1)));
        let mut buf = BytesMut::new();
        a.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Avp::decode(&mut frozen).unwrap();
        assert_eq!(decoded.value, AvpValue::Address(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
