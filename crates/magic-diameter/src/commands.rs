//! Strongly-typed request/answer payloads for the seven MAGIC command
//! pairs, built on top of the AVP tree in [`crate::avp`].

use thiserror::Error;

use crate::avp::{Avp, AvpValue};
use crate::dictionary::avp as code;

#[derive(Debug, Error)]
pub enum CommandDecodeError {
    #[error("missing required AVP {0} ({1})")]
    MissingAvp(u32, &'static str),
    #[error("AVP {0} ({1}) has the wrong value type")]
    WrongType(u32, &'static str),
}

fn require_u32(avps: &[Avp], code: u32, name: &'static str) -> Result<u32, CommandDecodeError> {
    Avp::find(avps, code)
        .ok_or(CommandDecodeError::MissingAvp(code, name))?
        .as_u32()
        .ok_or(CommandDecodeError::WrongType(code, name))
}

fn optional_u32(avps: &[Avp], code: u32) -> Option<u32> {
    Avp::find(avps, code).and_then(Avp::as_u32)
}

fn require_str<'a>(avps: &'a [Avp], code: u32, name: &'static str) -> Result<&'a str, CommandDecodeError> {
    Avp::find(avps, code)
        .ok_or(CommandDecodeError::MissingAvp(code, name))?
        .as_str()
        .ok_or(CommandDecodeError::WrongType(code, name))
}

fn optional_str<'a>(avps: &'a [Avp], code: u32) -> Option<&'a str> {
    Avp::find(avps, code).and_then(Avp::as_str)
}

fn string_list(avps: &[Avp], group_code: u32, leaf_code: u32) -> Vec<String> {
    Avp::find(avps, group_code)
        .and_then(Avp::as_group)
        .map(|group| {
            group
                .iter()
                .filter(|a| a.code == leaf_code)
                .filter_map(Avp::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ── MCAR / MCAA — authentication ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub user_name: String,
    pub client_password: String,
    pub server_password: Option<String>,
}

impl ClientCredentials {
    fn to_avp(&self) -> Avp {
        let mut children = vec![
            Avp::base(crate::dictionary::base_avp::USER_NAME, AvpValue::Utf8String(self.user_name.clone())),
            Avp::vendor(code::CLIENT_PASSWORD, AvpValue::Utf8String(self.client_password.clone())),
        ];
        if let Some(sp) = &self.server_password {
            children.push(Avp::vendor(code::SERVER_PASSWORD, AvpValue::Utf8String(sp.clone())));
        }
        Avp::vendor(code::CLIENT_CREDENTIALS, AvpValue::Grouped(children))
    }

    fn from_avps(avps: &[Avp]) -> Result<Self, CommandDecodeError> {
        let group = Avp::find(avps, code::CLIENT_CREDENTIALS)
            .ok_or(CommandDecodeError::MissingAvp(code::CLIENT_CREDENTIALS, "Client-Credentials"))?
            .as_group()
            .ok_or(CommandDecodeError::WrongType(code::CLIENT_CREDENTIALS, "Client-Credentials"))?;
        Ok(ClientCredentials {
            user_name: require_str(group, crate::dictionary::base_avp::USER_NAME, "User-Name")?.to_string(),
            client_password: require_str(group, code::CLIENT_PASSWORD, "Client-Password")?.to_string(),
            server_password: optional_str(group, code::SERVER_PASSWORD).map(str::to_string),
        })
    }
}

#[derive(Debug, Clone)]
pub struct McarRequest {
    pub session_id: String,
    pub credentials: ClientCredentials,
    /// Subscribe level in {0,1,2,3,6,7}; 4 and 5 are reserved-invalid.
    pub req_status_info: Option<u32>,
    pub comm_req: Option<CommunicationRequestParams>,
}

impl McarRequest {
    pub fn to_avps(&self) -> Vec<Avp> {
        let mut avps = vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            self.credentials.to_avp(),
        ];
        if let Some(level) = self.req_status_info {
            avps.push(Avp::vendor(code::REQ_STATUS_INFO, AvpValue::Enumerated(level as i32)));
        }
        if let Some(cr) = &self.comm_req {
            avps.push(cr.to_avp());
        }
        avps
    }

    pub fn from_avps(avps: &[Avp]) -> Result<Self, CommandDecodeError> {
        Ok(McarRequest {
            session_id: require_str(avps, crate::dictionary::base_avp::SESSION_ID, "Session-Id")?.to_string(),
            credentials: ClientCredentials::from_avps(avps)?,
            req_status_info: optional_u32(avps, code::REQ_STATUS_INFO),
            comm_req: Avp::find(avps, code::COMM_REQ_PARAMS)
                .and_then(Avp::as_group)
                .map(CommunicationRequestParams::from_group)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct McaaAnswer {
    pub session_id: String,
    pub result_code: u32,
    pub magic_status_code: Option<u32>,
    pub granted_status_info: Option<u32>,
    pub comm_ans: Option<CommunicationAnswerParams>,
}

impl McaaAnswer {
    pub fn to_avps(&self) -> Vec<Avp> {
        let mut avps = vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            Avp::base(crate::dictionary::base_avp::RESULT_CODE, AvpValue::Unsigned32(self.result_code)),
        ];
        if let Some(ms) = self.magic_status_code {
            avps.push(Avp::vendor(code::MAGIC_STATUS_CODE, AvpValue::Unsigned32(ms)));
        }
        if let Some(level) = self.granted_status_info {
            avps.push(Avp::vendor(code::REQ_STATUS_INFO, AvpValue::Enumerated(level as i32)));
        }
        if let Some(ca) = &self.comm_ans {
            avps.push(ca.to_avp());
        }
        avps
    }
}

// ── MCCR / MCCA — communication start/modify/stop/queue ─────────────

#[derive(Debug, Clone, Default)]
pub struct CommunicationRequestParams {
    pub profile_name: String,
    pub requested_bw_kbps: Option<u32>,
    pub requested_ret_bw_kbps: Option<u32>,
    pub required_bw_kbps: Option<u32>,
    pub required_ret_bw_kbps: Option<u32>,
    pub priority_class: Option<String>,
    pub qos_level: Option<u32>,
    pub flight_phase: Option<u32>,
    pub altitude: Option<i32>,
    pub airport: Option<String>,
    pub tft_to_ground: Vec<String>,
    pub tft_to_aircraft: Vec<String>,
    pub napt_rules: Vec<String>,
    pub keep_request: bool,
    pub accounting_enabled: bool,
    pub timeout_s: Option<u32>,
    pub auto_detect: bool,
}

impl CommunicationRequestParams {
    fn to_avp(&self) -> Avp {
        let mut children = vec![Avp::vendor(code::PROFILE_NAME, AvpValue::Utf8String(self.profile_name.clone()))];
        if let Some(v) = self.requested_bw_kbps {
            children.push(Avp::vendor(code::REQUESTED_BW, AvpValue::Unsigned32(v)));
        }
        if let Some(v) = self.requested_ret_bw_kbps {
            children.push(Avp::vendor(code::REQUESTED_RETURN_BW, AvpValue::Unsigned32(v)));
        }
        if let Some(v) = self.required_bw_kbps {
            children.push(Avp::vendor(code::REQUIRED_BW, AvpValue::Unsigned32(v)));
        }
        if let Some(v) = self.required_ret_bw_kbps {
            children.push(Avp::vendor(code::REQUIRED_RETURN_BW, AvpValue::Unsigned32(v)));
        }
        if let Some(v) = &self.priority_class {
            children.push(Avp::vendor(code::PRIORITY_CLASS, AvpValue::Utf8String(v.clone())));
        }
        if let Some(v) = self.qos_level {
            children.push(Avp::vendor(code::QOS_LEVEL, AvpValue::Unsigned32(v)));
        }
        if let Some(v) = self.flight_phase {
            children.push(Avp::vendor(code::FLIGHT_PHASE, AvpValue::Enumerated(v as i32)));
        }
        if let Some(v) = self.altitude {
            children.push(Avp::vendor(code::ALTITUDE, AvpValue::Integer32(v)));
        }
        if let Some(v) = &self.airport {
            children.push(Avp::vendor(code::AIRPORT, AvpValue::Utf8String(v.clone())));
        }
        if !self.tft_to_ground.is_empty() {
            children.push(Avp::vendor(
                code::TFT_TO_GROUND_LIST,
                AvpValue::Grouped(
                    self.tft_to_ground
                        .iter()
                        .map(|t| Avp::vendor(code::TFT_TO_GROUND_RULE, AvpValue::Utf8String(t.clone())))
                        .collect(),
                ),
            ));
        }
        if !self.tft_to_aircraft.is_empty() {
            children.push(Avp::vendor(
                code::TFT_TO_AIRCRAFT_LIST,
                AvpValue::Grouped(
                    self.tft_to_aircraft
                        .iter()
                        .map(|t| Avp::vendor(code::TFT_TO_AIRCRAFT_RULE, AvpValue::Utf8String(t.clone())))
                        .collect(),
                ),
            ));
        }
        if !self.napt_rules.is_empty() {
            children.push(Avp::vendor(
                code::NAPT_LIST,
                AvpValue::Grouped(
                    self.napt_rules
                        .iter()
                        .map(|n| Avp::vendor(code::NAPT_RULE, AvpValue::Utf8String(n.clone())))
                        .collect(),
                ),
            ));
        }
        children.push(Avp::vendor(code::KEEP_REQUEST, AvpValue::Unsigned32(self.keep_request as u32)));
        children.push(Avp::vendor(
            code::ACCOUNTING_ENABLED,
            AvpValue::Unsigned32(self.accounting_enabled as u32),
        ));
        if let Some(v) = self.timeout_s {
            children.push(Avp::vendor(code::TIMEOUT, AvpValue::Unsigned32(v)));
        }
        children.push(Avp::vendor(code::AUTO_DETECT, AvpValue::Unsigned32(self.auto_detect as u32)));
        Avp::vendor(code::COMM_REQ_PARAMS, AvpValue::Grouped(children))
    }

    fn from_group(group: &[Avp]) -> Result<Self, CommandDecodeError> {
        Ok(CommunicationRequestParams {
            profile_name: require_str(group, code::PROFILE_NAME, "Profile-Name")?.to_string(),
            requested_bw_kbps: optional_u32(group, code::REQUESTED_BW),
            requested_ret_bw_kbps: optional_u32(group, code::REQUESTED_RETURN_BW),
            required_bw_kbps: optional_u32(group, code::REQUIRED_BW),
            required_ret_bw_kbps: optional_u32(group, code::REQUIRED_RETURN_BW),
            priority_class: optional_str(group, code::PRIORITY_CLASS).map(str::to_string),
            qos_level: optional_u32(group, code::QOS_LEVEL),
            flight_phase: optional_u32(group, code::FLIGHT_PHASE),
            altitude: Avp::find(group, code::ALTITUDE).and_then(|a| match a.value {
                AvpValue::Integer32(v) => Some(v),
                _ => None,
            }),
            airport: optional_str(group, code::AIRPORT).map(str::to_string),
            tft_to_ground: string_list(group, code::TFT_TO_GROUND_LIST, code::TFT_TO_GROUND_RULE),
            tft_to_aircraft: string_list(group, code::TFT_TO_AIRCRAFT_LIST, code::TFT_TO_AIRCRAFT_RULE),
            napt_rules: string_list(group, code::NAPT_LIST, code::NAPT_RULE),
            keep_request: optional_u32(group, code::KEEP_REQUEST).unwrap_or(0) != 0,
            accounting_enabled: optional_u32(group, code::ACCOUNTING_ENABLED).unwrap_or(0) != 0,
            timeout_s: optional_u32(group, code::TIMEOUT),
            auto_detect: optional_u32(group, code::AUTO_DETECT).unwrap_or(0) != 0,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommunicationAnswerParams {
    pub profile_name: String,
    pub granted_bw_kbps: u32,
    pub granted_ret_bw_kbps: u32,
    pub selected_link_name: Option<String>,
    pub gateway_ip: Option<std::net::Ipv4Addr>,
    pub qos_level: Option<u32>,
    pub session_timeout_s: Option<u32>,
    pub tft_to_ground: Vec<String>,
    pub tft_to_aircraft: Vec<String>,
}

impl CommunicationAnswerParams {
    fn to_avp(&self) -> Avp {
        let mut children = vec![
            Avp::vendor(code::PROFILE_NAME, AvpValue::Utf8String(self.profile_name.clone())),
            Avp::vendor(code::GRANTED_BW, AvpValue::Unsigned32(self.granted_bw_kbps)),
            Avp::vendor(code::GRANTED_RETURN_BW, AvpValue::Unsigned32(self.granted_ret_bw_kbps)),
        ];
        if let Some(name) = &self.selected_link_name {
            children.push(Avp::vendor(code::DLM_NAME, AvpValue::Utf8String(name.clone())));
        }
        if let Some(ip) = self.gateway_ip {
            children.push(Avp::vendor(code::GATEWAY_IP, AvpValue::Address(ip)));
        }
        if let Some(v) = self.qos_level {
            children.push(Avp::vendor(code::QOS_LEVEL, AvpValue::Unsigned32(v)));
        }
        if let Some(v) = self.session_timeout_s {
            children.push(Avp::vendor(code::TIMEOUT, AvpValue::Unsigned32(v)));
        }
        if !self.tft_to_ground.is_empty() {
            children.push(Avp::vendor(
                code::TFT_TO_GROUND_LIST,
                AvpValue::Grouped(
                    self.tft_to_ground
                        .iter()
                        .map(|t| Avp::vendor(code::TFT_TO_GROUND_RULE, AvpValue::Utf8String(t.clone())))
                        .collect(),
                ),
            ));
        }
        if !self.tft_to_aircraft.is_empty() {
            children.push(Avp::vendor(
                code::TFT_TO_AIRCRAFT_LIST,
                AvpValue::Grouped(
                    self.tft_to_aircraft
                        .iter()
                        .map(|t| Avp::vendor(code::TFT_TO_AIRCRAFT_RULE, AvpValue::Utf8String(t.clone())))
                        .collect(),
                ),
            ));
        }
        Avp::vendor(code::COMM_ANS_PARAMS, AvpValue::Grouped(children))
    }
}

#[derive(Debug, Clone)]
pub struct MccrRequest {
    pub session_id: String,
    pub comm_req: CommunicationRequestParams,
}

impl MccrRequest {
    pub fn to_avps(&self) -> Vec<Avp> {
        vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            self.comm_req.to_avp(),
        ]
    }

    pub fn from_avps(avps: &[Avp]) -> Result<Self, CommandDecodeError> {
        let group = Avp::find(avps, code::COMM_REQ_PARAMS)
            .ok_or(CommandDecodeError::MissingAvp(code::COMM_REQ_PARAMS, "Communication-Request-Parameters"))?
            .as_group()
            .ok_or(CommandDecodeError::WrongType(code::COMM_REQ_PARAMS, "Communication-Request-Parameters"))?;
        Ok(MccrRequest {
            session_id: require_str(avps, crate::dictionary::base_avp::SESSION_ID, "Session-Id")?.to_string(),
            comm_req: CommunicationRequestParams::from_group(group)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MccaAnswer {
    pub session_id: String,
    pub result_code: u32,
    pub magic_status_code: Option<u32>,
    pub comm_ans: Option<CommunicationAnswerParams>,
}

impl MccaAnswer {
    pub fn to_avps(&self) -> Vec<Avp> {
        let mut avps = vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            Avp::base(crate::dictionary::base_avp::RESULT_CODE, AvpValue::Unsigned32(self.result_code)),
        ];
        if let Some(ms) = self.magic_status_code {
            avps.push(Avp::vendor(code::MAGIC_STATUS_CODE, AvpValue::Unsigned32(ms)));
        }
        if let Some(ca) = &self.comm_ans {
            avps.push(ca.to_avp());
        }
        avps
    }
}

// ── MNTR / MNTA — server-initiated session notification ─────────────

#[derive(Debug, Clone)]
pub struct MntrNotification {
    pub session_id: String,
    pub magic_status_code: u32,
    pub comm_report: CommunicationAnswerParams,
}

impl MntrNotification {
    pub fn to_avps(&self) -> Vec<Avp> {
        vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            Avp::vendor(code::MAGIC_STATUS_CODE, AvpValue::Unsigned32(self.magic_status_code)),
            {
                let mut avp = self.comm_report.to_avp();
                avp.code = code::COMM_REPORT_PARAMS;
                avp
            },
        ]
    }
}

// ── MSCR / MSXR — status broadcast / query ───────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    None = 0,
    Own = 1,
    Summary = 2,
    Full = 3,
    OwnChanges = 6,
    FullChanges = 7,
}

impl StatusType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(StatusType::None),
            1 => Some(StatusType::Own),
            2 => Some(StatusType::Summary),
            3 => Some(StatusType::Full),
            6 => Some(StatusType::OwnChanges),
            7 => Some(StatusType::FullChanges),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MsxrRequest {
    pub session_id: String,
    pub status_type: u32,
}

impl MsxrRequest {
    pub fn from_avps(avps: &[Avp]) -> Result<Self, CommandDecodeError> {
        Ok(MsxrRequest {
            session_id: require_str(avps, crate::dictionary::base_avp::SESSION_ID, "Session-Id")?.to_string(),
            status_type: require_u32(avps, code::STATUS_TYPE, "Status-Type")?,
        })
    }

    pub fn to_avps(&self) -> Vec<Avp> {
        vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            Avp::vendor(code::STATUS_TYPE, AvpValue::Enumerated(self.status_type as i32)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct DlmInfo {
    pub dlm_name: String,
    pub dlm_available: bool,
    pub links: Vec<LinkStatus>,
}

#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub link_number: u32,
    pub link_available: bool,
    pub link_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MscrStatusBroadcast {
    pub session_id: String,
    pub status_type: u32,
    pub dlm_list: Vec<DlmInfo>,
}

impl MscrStatusBroadcast {
    pub fn to_avps(&self) -> Vec<Avp> {
        let dlm_list_avp = Avp::vendor(
            code::DLM_LIST,
            AvpValue::Grouped(
                self.dlm_list
                    .iter()
                    .map(|dlm| {
                        let mut children = vec![
                            Avp::vendor(code::DLM_NAME, AvpValue::Utf8String(dlm.dlm_name.clone())),
                            Avp::vendor(code::DLM_AVAILABLE, AvpValue::Enumerated(dlm.dlm_available as i32)),
                        ];
                        if !dlm.links.is_empty() {
                            children.push(Avp::vendor(
                                code::DLM_LINK_STATUS_LIST,
                                AvpValue::Grouped(
                                    dlm.links
                                        .iter()
                                        .map(|link| {
                                            let mut l = vec![
                                                Avp::vendor(code::LINK_NUMBER, AvpValue::Unsigned32(link.link_number)),
                                                Avp::vendor(
                                                    code::LINK_AVAILABLE,
                                                    AvpValue::Enumerated(link.link_available as i32),
                                                ),
                                            ];
                                            if let Some(name) = &link.link_name {
                                                l.push(Avp::vendor(code::LINK_NAME, AvpValue::Utf8String(name.clone())));
                                            }
                                            Avp::vendor(code::LINK_STATUS_GROUP, AvpValue::Grouped(l))
                                        })
                                        .collect(),
                                ),
                            ));
                        }
                        Avp::vendor(code::DLM_INFO, AvpValue::Grouped(children))
                    })
                    .collect(),
            ),
        );
        vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            Avp::vendor(code::STATUS_TYPE, AvpValue::Enumerated(self.status_type as i32)),
            dlm_list_avp,
        ]
    }
}

// ── MADR / MACR — accounting ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountingDataQuery {
    List,
    Data,
}

#[derive(Debug, Clone)]
pub struct MadrRequest {
    pub session_id: String,
    pub query: AccountingDataQuery,
    pub cdr_request_id: Option<String>,
}

impl MadrRequest {
    pub fn from_avps(avps: &[Avp]) -> Result<Self, CommandDecodeError> {
        let cdr_request_id = optional_str(avps, code::CDR_REQ_ID).map(str::to_string);
        Ok(MadrRequest {
            session_id: require_str(avps, crate::dictionary::base_avp::SESSION_ID, "Session-Id")?.to_string(),
            query: if cdr_request_id.is_some() {
                AccountingDataQuery::Data
            } else {
                AccountingDataQuery::List
            },
            cdr_request_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CdrInfo {
    pub cdr_id: String,
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct MadaAnswer {
    pub session_id: String,
    pub result_code: u32,
    pub active: Vec<CdrInfo>,
    pub finished: Vec<CdrInfo>,
    pub forwarded: Vec<CdrInfo>,
    pub unknown: Vec<CdrInfo>,
}

fn cdr_group(list_code: u32, cdrs: &[CdrInfo]) -> Option<Avp> {
    if cdrs.is_empty() {
        return None;
    }
    Some(Avp::vendor(
        list_code,
        AvpValue::Grouped(
            cdrs.iter()
                .map(|cdr| {
                    let mut children = vec![Avp::vendor(code::CDR_ID, AvpValue::Utf8String(cdr.cdr_id.clone()))];
                    if let Some(content) = &cdr.content {
                        children.push(Avp::vendor(code::CDR_CONTENT, AvpValue::OctetString(content.clone())));
                    }
                    Avp::vendor(code::CDR_INFO, AvpValue::Grouped(children))
                })
                .collect(),
        ),
    ))
}

impl MadaAnswer {
    pub fn to_avps(&self) -> Vec<Avp> {
        let mut avps = vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            Avp::base(crate::dictionary::base_avp::RESULT_CODE, AvpValue::Unsigned32(self.result_code)),
        ];
        avps.extend(cdr_group(code::CDRS_ACTIVE, &self.active));
        avps.extend(cdr_group(code::CDRS_FINISHED, &self.finished));
        avps.extend(cdr_group(code::CDRS_FORWARDED, &self.forwarded));
        avps.extend(cdr_group(code::CDRS_UNKNOWN, &self.unknown));
        avps
    }
}

#[derive(Debug, Clone)]
pub struct MacrRestartRequest {
    pub session_id: String,
}

impl MacrRestartRequest {
    pub fn from_avps(avps: &[Avp]) -> Result<Self, CommandDecodeError> {
        Ok(MacrRestartRequest {
            session_id: require_str(avps, crate::dictionary::base_avp::SESSION_ID, "Session-Id")?.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MacaAnswer {
    pub session_id: String,
    pub result_code: u32,
    /// The Start-Stop-Pair produced by the restart: (closed CDR id, new CDR id).
    pub start_stop_pair: Option<(String, String)>,
}

impl MacaAnswer {
    pub fn to_avps(&self) -> Vec<Avp> {
        let mut avps = vec![
            Avp::base(
                crate::dictionary::base_avp::SESSION_ID,
                AvpValue::Utf8String(self.session_id.clone()),
            ),
            Avp::base(crate::dictionary::base_avp::RESULT_CODE, AvpValue::Unsigned32(self.result_code)),
        ];
        if let Some((stopped, started)) = &self.start_stop_pair {
            avps.push(Avp::vendor(
                code::CDRS_UPDATED,
                AvpValue::Grouped(vec![Avp::vendor(
                    code::CDR_START_STOP_PAIR,
                    AvpValue::Grouped(vec![
                        Avp::vendor(code::CDR_STOPPED, AvpValue::Utf8String(stopped.clone())),
                        Avp::vendor(code::CDR_STARTED, AvpValue::Utf8String(started.clone())),
                    ]),
                )]),
            ));
        }
        avps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcar_round_trips_through_avp_tree() {
        let req = McarRequest {
            session_id: "gw.example.com;1700000000;1".to_string(),
            credentials: ClientCredentials {
                user_name: "EFB_NAV_APP_01".to_string(),
                client_password: "p1".to_string(),
                server_password: None,
            },
            req_status_info: Some(3),
            comm_req: Some(CommunicationRequestParams {
                profile_name: "IP_DATA".to_string(),
                requested_bw_kbps: Some(5000),
                requested_ret_bw_kbps: Some(5000),
                priority_class: Some("2".to_string()),
                qos_level: Some(1),
                tft_to_ground: vec![
                    "_iTFT=,,,192.168.0.10.255.255.255.255,10.2.2.0.255.255.255.0,6,80.80,1024.65535".to_string(),
                ],
                ..Default::default()
            }),
        };
        let avps = req.to_avps();
        let decoded = McarRequest::from_avps(&avps).unwrap();
        assert_eq!(decoded.credentials.user_name, "EFB_NAV_APP_01");
        assert_eq!(decoded.req_status_info, Some(3));
        assert_eq!(decoded.comm_req.unwrap().requested_bw_kbps, Some(5000));
    }

    #[test]
    fn mccr_round_trips_tft_lists() {
        let req = MccrRequest {
            session_id: "s1".to_string(),
            comm_req: CommunicationRequestParams {
                profile_name: "IP_DATA".to_string(),
                tft_to_ground: vec!["a".to_string(), "b".to_string()],
                keep_request: true,
                ..Default::default()
            },
        };
        let avps = req.to_avps();
        let decoded = MccrRequest::from_avps(&avps).unwrap();
        assert_eq!(decoded.comm_req.tft_to_ground, vec!["a", "b"]);
        assert!(decoded.comm_req.keep_request);
    }

    #[test]
    fn missing_session_id_is_an_error() {
        let err = McarRequest::from_avps(&[]);
        assert!(err.is_err());
    }
}
