//! DLM <-> core IPC wire protocol over the `/tmp/magic_core.sock` UNIX
//! domain socket (ARINC 839 LMI primitives, simplified). Each message is a
//! fixed 12-byte [`IpcHeader`] followed by a type-specific fixed-layout
//! payload, mirroring the original packed-C-struct framing byte for byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use thiserror::Error;

pub const MAX_IPC_NAME_LEN: usize = 32;
pub const MAX_IFACE_LEN: usize = 16;
const HEADER_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum IpcCodecError {
    #[error("message truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),
    #[error("fixed-width field is not valid UTF-8")]
    BadUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Register = 0x01,
    RegisterAck = 0x02,
    LinkEvent = 0x03,
    ResourceReq = 0x04,
    ResourceResp = 0x05,
    Heartbeat = 0x06,
    Shutdown = 0x07,
    PolicyReq = 0x08,
    PolicyResp = 0x09,
}

impl MessageType {
    fn from_u32(v: u32) -> Result<Self, IpcCodecError> {
        Ok(match v {
            0x01 => MessageType::Register,
            0x02 => MessageType::RegisterAck,
            0x03 => MessageType::LinkEvent,
            0x04 => MessageType::ResourceReq,
            0x05 => MessageType::ResourceResp,
            0x06 => MessageType::Heartbeat,
            0x07 => MessageType::Shutdown,
            0x08 => MessageType::PolicyReq,
            0x09 => MessageType::PolicyResp,
            other => return Err(IpcCodecError::UnknownMessageType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IpcHeader {
    pub msg_type: MessageType,
    pub length: u32,
    pub sequence: u32,
}

impl IpcHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.msg_type as u32);
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.sequence);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, IpcCodecError> {
        if buf.len() < HEADER_LEN {
            return Err(IpcCodecError::Truncated {
                need: HEADER_LEN,
                have: buf.len(),
            });
        }
        let msg_type = MessageType::from_u32(buf.get_u32_le())?;
        let length = buf.get_u32_le();
        let sequence = buf.get_u32_le();
        Ok(IpcHeader {
            msg_type,
            length,
            sequence,
        })
    }
}

fn put_fixed_str(buf: &mut BytesMut, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let take = bytes.len().min(width);
    buf.put_slice(&bytes[..take]);
    for _ in take..width {
        buf.put_u8(0);
    }
}

fn get_fixed_str(buf: &mut Bytes, width: usize) -> Result<String, IpcCodecError> {
    if buf.len() < width {
        return Err(IpcCodecError::Truncated {
            need: width,
            have: buf.len(),
        });
    }
    let raw = buf.copy_to_bytes(width);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|_| IpcCodecError::BadUtf8)
}

/// DLM -> core: register a link's static capabilities at startup.
#[derive(Debug, Clone)]
pub struct MsgRegister {
    pub dlm_id: String,
    pub link_profile_id: String,
    pub iface_name: String,
    pub cost_index: u32,
    pub max_bw_kbps: u32,
    pub typical_latency_ms: u32,
    pub priority: u8,
    /// 1=global, 2=terrestrial, 3=gate-only.
    pub coverage: u8,
}

impl MsgRegister {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, &self.dlm_id, MAX_IPC_NAME_LEN);
        put_fixed_str(&mut buf, &self.link_profile_id, MAX_IPC_NAME_LEN);
        put_fixed_str(&mut buf, &self.iface_name, MAX_IFACE_LEN);
        buf.put_u32_le(self.cost_index);
        buf.put_u32_le(self.max_bw_kbps);
        buf.put_u32_le(self.typical_latency_ms);
        buf.put_u8(self.priority);
        buf.put_u8(self.coverage);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, IpcCodecError> {
        Ok(MsgRegister {
            dlm_id: get_fixed_str(&mut buf, MAX_IPC_NAME_LEN)?,
            link_profile_id: get_fixed_str(&mut buf, MAX_IPC_NAME_LEN)?,
            iface_name: get_fixed_str(&mut buf, MAX_IFACE_LEN)?,
            cost_index: buf.get_u32_le(),
            max_bw_kbps: buf.get_u32_le(),
            typical_latency_ms: buf.get_u32_le(),
            priority: buf.get_u8(),
            coverage: buf.get_u8(),
        })
    }
}

/// core -> DLM: registration result.
#[derive(Debug, Clone)]
pub struct MsgRegisterAck {
    pub result: u8,
    pub assigned_id: u32,
    pub message: String,
}

impl MsgRegisterAck {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.result);
        buf.put_u32_le(self.assigned_id);
        put_fixed_str(&mut buf, &self.message, 64);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, IpcCodecError> {
        Ok(MsgRegisterAck {
            result: buf.get_u8(),
            assigned_id: buf.get_u32_le(),
            message: get_fixed_str(&mut buf, 64)?,
        })
    }
}

/// DLM -> core: link up/down and current dynamic state.
#[derive(Debug, Clone)]
pub struct MsgLinkEvent {
    pub dlm_id: String,
    pub is_link_up: bool,
    pub current_bw_kbps: u32,
    pub current_latency_ms: u32,
    pub signal_strength_dbm: i32,
    pub ip_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl MsgLinkEvent {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, &self.dlm_id, MAX_IPC_NAME_LEN);
        buf.put_u8(self.is_link_up as u8);
        buf.put_u32_le(self.current_bw_kbps);
        buf.put_u32_le(self.current_latency_ms);
        buf.put_i32_le(self.signal_strength_dbm);
        buf.put_u32(u32::from(self.ip_address));
        buf.put_u32(u32::from(self.netmask));
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, IpcCodecError> {
        Ok(MsgLinkEvent {
            dlm_id: get_fixed_str(&mut buf, MAX_IPC_NAME_LEN)?,
            is_link_up: buf.get_u8() != 0,
            current_bw_kbps: buf.get_u32_le(),
            current_latency_ms: buf.get_u32_le(),
            signal_strength_dbm: buf.get_i32_le(),
            ip_address: Ipv4Addr::from(buf.get_u32()),
            netmask: Ipv4Addr::from(buf.get_u32()),
        })
    }
}

/// core -> DLM: request bandwidth allocation for a session.
#[derive(Debug, Clone)]
pub struct MsgResourceReq {
    pub session_id: u32,
    pub requested_bw_kbps: u32,
    pub max_latency_ms: u32,
}

impl MsgResourceReq {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.session_id);
        buf.put_u32_le(self.requested_bw_kbps);
        buf.put_u32_le(self.max_latency_ms);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, IpcCodecError> {
        Ok(MsgResourceReq {
            session_id: buf.get_u32_le(),
            requested_bw_kbps: buf.get_u32_le(),
            max_latency_ms: buf.get_u32_le(),
        })
    }
}

/// DLM -> core: allocation result.
#[derive(Debug, Clone)]
pub struct MsgResourceResp {
    pub session_id: u32,
    pub result: u8,
    pub granted_bw_kbps: u32,
}

impl MsgResourceResp {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.session_id);
        buf.put_u8(self.result);
        buf.put_u32_le(self.granted_bw_kbps);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, IpcCodecError> {
        Ok(MsgResourceResp {
            session_id: buf.get_u32_le(),
            result: buf.get_u8(),
            granted_bw_kbps: buf.get_u32_le(),
        })
    }
}

/// DLM -> core: liveness plus accounting counters.
#[derive(Debug, Clone)]
pub struct MsgHeartbeat {
    pub dlm_id: String,
    pub is_healthy: bool,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

impl MsgHeartbeat {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, &self.dlm_id, MAX_IPC_NAME_LEN);
        buf.put_u8(self.is_healthy as u8);
        buf.put_u64_le(self.tx_bytes);
        buf.put_u64_le(self.rx_bytes);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, IpcCodecError> {
        Ok(MsgHeartbeat {
            dlm_id: get_fixed_str(&mut buf, MAX_IPC_NAME_LEN)?,
            is_healthy: buf.get_u8() != 0,
            tx_bytes: buf.get_u64_le(),
            rx_bytes: buf.get_u64_le(),
        })
    }
}

/// CIC -> core: ask for a path-selection decision out of band (used by
/// non-Diameter-aware clients' integration component).
#[derive(Debug, Clone)]
pub struct MsgPolicyReq {
    pub client_id: String,
    pub profile_name: String,
    pub requested_bw_kbps: u32,
    pub requested_ret_bw_kbps: u32,
    pub priority_class: u8,
    pub qos_level: u8,
    pub traffic_class: u8,
    pub flight_phase: u8,
}

impl MsgPolicyReq {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_fixed_str(&mut buf, &self.client_id, 64);
        put_fixed_str(&mut buf, &self.profile_name, 64);
        buf.put_u32_le(self.requested_bw_kbps);
        buf.put_u32_le(self.requested_ret_bw_kbps);
        buf.put_u8(self.priority_class);
        buf.put_u8(self.qos_level);
        buf.put_u8(self.traffic_class);
        buf.put_u8(self.flight_phase);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, IpcCodecError> {
        Ok(MsgPolicyReq {
            client_id: get_fixed_str(&mut buf, 64)?,
            profile_name: get_fixed_str(&mut buf, 64)?,
            requested_bw_kbps: buf.get_u32_le(),
            requested_ret_bw_kbps: buf.get_u32_le(),
            priority_class: buf.get_u8(),
            qos_level: buf.get_u8(),
            traffic_class: buf.get_u8(),
            flight_phase: buf.get_u8(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MsgPolicyResp {
    pub result_code: u8,
    pub selected_link_id: String,
    pub granted_bw_kbps: u32,
    pub granted_ret_bw_kbps: u32,
    pub qos_level: u8,
    pub reason: String,
}

impl MsgPolicyResp {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.result_code);
        put_fixed_str(&mut buf, &self.selected_link_id, 64);
        buf.put_u32_le(self.granted_bw_kbps);
        buf.put_u32_le(self.granted_ret_bw_kbps);
        buf.put_u8(self.qos_level);
        put_fixed_str(&mut buf, &self.reason, 128);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, IpcCodecError> {
        Ok(MsgPolicyResp {
            result_code: buf.get_u8(),
            selected_link_id: get_fixed_str(&mut buf, 64)?,
            granted_bw_kbps: buf.get_u32_le(),
            granted_ret_bw_kbps: buf.get_u32_le(),
            qos_level: buf.get_u8(),
            reason: get_fixed_str(&mut buf, 128)?,
        })
    }
}

/// Frame a header + payload pair ready to write to the socket.
pub fn frame(msg_type: MessageType, sequence: u32, payload: &Bytes) -> Bytes {
    let mut buf = BytesMut::new();
    IpcHeader {
        msg_type,
        length: payload.len() as u32,
        sequence,
    }
    .encode(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = IpcHeader {
            msg_type: MessageType::Heartbeat,
            length: 45,
            sequence: 7,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = IpcHeader::decode(&mut frozen).unwrap();
        assert_eq!(decoded.msg_type, MessageType::Heartbeat);
        assert_eq!(decoded.length, 45);
        assert_eq!(decoded.sequence, 7);
    }

    #[test]
    fn register_round_trips_and_truncates_long_names() {
        let long_name = "X".repeat(MAX_IPC_NAME_LEN + 10);
        let msg = MsgRegister {
            dlm_id: long_name.clone(),
            link_profile_id: "LINK_SATCOM".to_string(),
            iface_name: "eth1".to_string(),
            cost_index: 90,
            max_bw_kbps: 2048,
            typical_latency_ms: 600,
            priority: 5,
            coverage: 1,
        };
        let encoded = msg.encode();
        assert_eq!(encoded.len(), MAX_IPC_NAME_LEN * 2 + MAX_IFACE_LEN + 4 + 4 + 4 + 1 + 1);
        let decoded = MsgRegister::decode(encoded).unwrap();
        assert_eq!(decoded.dlm_id.len(), MAX_IPC_NAME_LEN);
        assert_eq!(decoded.link_profile_id, "LINK_SATCOM");
        assert_eq!(decoded.max_bw_kbps, 2048);
    }

    #[test]
    fn link_event_round_trips_ip_fields() {
        let msg = MsgLinkEvent {
            dlm_id: "DLM_WIFI".to_string(),
            is_link_up: true,
            current_bw_kbps: 20000,
            current_latency_ms: 20,
            signal_strength_dbm: -55,
            ip_address: Ipv4Addr::new(192, 168, 126, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        let decoded = MsgLinkEvent::decode(msg.encode()).unwrap();
        assert_eq!(decoded.ip_address, Ipv4Addr::new(192, 168, 126, 1));
        assert!(decoded.is_link_up);
        assert_eq!(decoded.signal_strength_dbm, -55);
    }

    #[test]
    fn heartbeat_round_trips_u64_counters() {
        let msg = MsgHeartbeat {
            dlm_id: "DLM_SATCOM".to_string(),
            is_healthy: true,
            tx_bytes: 123_456_789_012,
            rx_bytes: 987_654_321,
        };
        let decoded = MsgHeartbeat::decode(msg.encode()).unwrap();
        assert_eq!(decoded.tx_bytes, 123_456_789_012);
    }

    #[test]
    fn frame_prefixes_correct_length() {
        let payload = MsgHeartbeat {
            dlm_id: "DLM_X".to_string(),
            is_healthy: true,
            tx_bytes: 1,
            rx_bytes: 2,
        }
        .encode();
        let framed = frame(MessageType::Heartbeat, 1, &payload);
        let mut buf = framed.clone();
        let header = IpcHeader::decode(&mut buf).unwrap();
        assert_eq!(header.length as usize, payload.len());
        assert_eq!(buf.len(), payload.len());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(0xFF);
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        let mut frozen = buf.freeze();
        assert!(IpcHeader::decode(&mut frozen).is_err());
    }
}
