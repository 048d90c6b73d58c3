//! The per-message envelope: command code, flags, application id, and the
//! hop-by-hop/end-to-end identifiers plus the top-level AVP list.
//!
//! This is *not* Diameter base-protocol framing (CER/CEA, peer discovery,
//! watchdog) — the transport that owns a TCP/SCTP connection is expected to
//! already have delimited one whole message before handing it here.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::avp::{Avp, AvpCodecError};
use crate::dictionary::MAGIC_APPLICATION_ID;

const FLAG_REQUEST: u8 = 0x80;
const VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum MessageCodecError {
    #[error("message truncated: need at least 20 bytes, have {0}")]
    TruncatedHeader(usize),
    #[error("unsupported Diameter version {0}")]
    UnsupportedVersion(u8),
    #[error(transparent)]
    Avp(#[from] AvpCodecError),
}

/// One whole Diameter message: header plus top-level AVPs.
#[derive(Debug, Clone)]
pub struct DiameterMessage {
    pub command_code: u32,
    pub is_request: bool,
    pub application_id: u32,
    pub hop_by_hop_id: u32,
    pub end_to_end_id: u32,
    pub avps: Vec<Avp>,
}

impl DiameterMessage {
    pub fn request(command_code: u32, hop_by_hop_id: u32, end_to_end_id: u32, avps: Vec<Avp>) -> Self {
        DiameterMessage {
            command_code,
            is_request: true,
            application_id: MAGIC_APPLICATION_ID,
            hop_by_hop_id,
            end_to_end_id,
            avps,
        }
    }

    pub fn answer_to(request: &DiameterMessage, avps: Vec<Avp>) -> Self {
        DiameterMessage {
            command_code: request.command_code,
            is_request: false,
            application_id: request.application_id,
            hop_by_hop_id: request.hop_by_hop_id,
            end_to_end_id: request.end_to_end_id,
            avps,
        }
    }

    pub fn find(&self, code: u32) -> Option<&Avp> {
        Avp::find(&self.avps, code)
    }

    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        for avp in &self.avps {
            avp.encode(&mut body);
        }

        let mut out = BytesMut::new();
        let total_len = 20 + body.len();
        out.put_u8(VERSION);
        out.put_uint(total_len as u64, 3);

        let flags = if self.is_request { FLAG_REQUEST } else { 0 };
        out.put_u8(flags);
        out.put_uint(self.command_code as u64, 3);
        out.put_u32(self.application_id);
        out.put_u32(self.hop_by_hop_id);
        out.put_u32(self.end_to_end_id);
        out.put_slice(&body);
        out.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, MessageCodecError> {
        if buf.len() < 20 {
            return Err(MessageCodecError::TruncatedHeader(buf.len()));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(MessageCodecError::UnsupportedVersion(version));
        }
        let _total_len = buf.get_uint(3) as usize;
        let flags = buf.get_u8();
        let command_code = buf.get_uint(3) as u32;
        let application_id = buf.get_u32();
        let hop_by_hop_id = buf.get_u32();
        let end_to_end_id = buf.get_u32();

        let mut avps = Vec::new();
        while !buf.is_empty() {
            avps.push(Avp::decode(&mut buf)?);
        }

        Ok(DiameterMessage {
            command_code,
            is_request: flags & FLAG_REQUEST != 0,
            application_id,
            hop_by_hop_id,
            end_to_end_id,
            avps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avp::AvpValue;
    use crate::dictionary::{avp, CMD_MCAR_CODE};

    #[test]
    fn round_trips_header_and_avps() {
        let msg = DiameterMessage::request(
            CMD_MCAR_CODE,
            1,
            2,
            vec![Avp::vendor(avp::PROFILE_NAME, AvpValue::Utf8String("IP_DATA".into()))],
        );
        let encoded = msg.encode();
        let decoded = DiameterMessage::decode(encoded).unwrap();
        assert_eq!(decoded.command_code, CMD_MCAR_CODE);
        assert!(decoded.is_request);
        assert_eq!(decoded.find(avp::PROFILE_NAME).unwrap().as_str(), Some("IP_DATA"));
    }

    #[test]
    fn answer_mirrors_request_ids_and_clears_request_flag() {
        let req = DiameterMessage::request(CMD_MCAR_CODE, 5, 9, vec![]);
        let ans = DiameterMessage::answer_to(&req, vec![]);
        assert!(!ans.is_request);
        assert_eq!(ans.hop_by_hop_id, 5);
        assert_eq!(ans.end_to_end_id, 9);
    }
}
