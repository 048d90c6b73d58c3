//! C6 — the Diameter command dispatcher. Decodes inbound requests,
//! drives the session FSM and its collaborators, and encodes answers.

use std::net::Ipv4Addr;

use magic_common::auth::verify_password;
use magic_common::errors::MagicError;
use magic_common::ids;
use magic_common::model::{ClientAuth, ClientProfile, TrafficClass};
use magic_common::status::{MagicStatus, ResultCode};
use magic_dataplane::KernelExecutor;
use magic_diameter::commands::{
    AccountingDataQuery, CdrInfo, ClientCredentials, CommunicationAnswerParams, McaaAnswer, McarRequest,
    MacaAnswer, MacrRestartRequest, MadaAnswer, MadrRequest, MccaAnswer, MccrRequest, MsxrRequest,
};
use magic_diameter::dictionary::{CMD_MACR_CODE, CMD_MADR_CODE, CMD_MCAR_CODE, CMD_MCCR_CODE, CMD_MSXR_CODE};
use magic_diameter::{Avp, DiameterMessage};
use magic_session::{BoundTftRule, CdrState, ClientSession, QueuedGrant, StatusLevel};
use magic_tft::whitelist::{validate_napt, validate_tft};
use magic_tft::{Direction, NaptRule};

use crate::state::GatewayState;

/// Everything the policy/dataplane steps of MCCR need from the winning
/// path, bundled so the happy-path code stays readable.
struct GrantedPath {
    link_id: String,
    link_ip: Ipv4Addr,
    available_bw_kbps: u32,
}

fn wire_status(err: &MagicError) -> (u32, u32) {
    let (rc, ms) = err.to_wire();
    (rc.code(), ms.code())
}

fn find_client<'a, E: KernelExecutor>(state: &'a GatewayState<E>, username: &str) -> Option<&'a ClientProfile> {
    state.config.find_client_by_username(username)
}

fn authenticate_credentials(profile: &ClientProfile, creds: &ClientCredentials) -> Result<(), MagicError> {
    match &profile.auth {
        ClientAuth::MagicAware { password_hash, .. } => {
            let ok = verify_password(&creds.client_password, password_hash).unwrap_or(false);
            if ok {
                Ok(())
            } else {
                Err(MagicError::AuthenticationFailed)
            }
        }
        ClientAuth::NonAware { .. } => Err(MagicError::AuthenticationFailed),
    }
}

/// Server-authorized subscription cap, read from the profile's metadata
/// (`max_status_level`); clients requesting more are silently downgraded
/// per spec §8 invariant 8.
fn authorized_status_level(profile: &ClientProfile, requested: Option<u32>) -> StatusLevel {
    let requested = requested.and_then(StatusLevel::from_u32).unwrap_or(StatusLevel::None);
    let cap = profile
        .metadata
        .get("max_status_level")
        .and_then(|v| v.parse::<u32>().ok())
        .and_then(StatusLevel::from_u32)
        .unwrap_or(StatusLevel::All);
    if requested.code() <= cap.code() {
        requested
    } else {
        cap
    }
}

pub fn handle_mcar<E: KernelExecutor>(state: &GatewayState<E>, req: McarRequest, now_unix: u64) -> McaaAnswer {
    let profile = match find_client(state, &req.credentials.user_name) {
        Some(p) => p.clone(),
        None => {
            let (rc, ms) = wire_status(&MagicError::AuthenticationFailed);
            return McaaAnswer {
                session_id: req.session_id,
                result_code: rc,
                magic_status_code: Some(ms),
                granted_status_info: None,
                comm_ans: None,
            };
        }
    };

    if let Err(e) = authenticate_credentials(&profile, &req.credentials) {
        let (rc, ms) = wire_status(&e);
        return McaaAnswer {
            session_id: req.session_id,
            result_code: rc,
            magic_status_code: Some(ms),
            granted_status_info: None,
            comm_ans: None,
        };
    }

    let granted_level = authorized_status_level(&profile, req.req_status_info);
    let mut session = ClientSession::new(req.session_id.clone(), profile.client_id.clone(), now_unix);
    if session.authenticate(granted_level, now_unix).is_err() {
        return McaaAnswer {
            session_id: req.session_id,
            result_code: ResultCode::UnableToComply.code(),
            magic_status_code: Some(MagicStatus::MagicFailure.code()),
            granted_status_info: None,
            comm_ans: None,
        };
    }

    let mut comm_ans = None;
    if let Some(comm_req) = &req.comm_req {
        match grant_communication(state, &mut session, &profile, comm_req, now_unix) {
            Ok(ans) => comm_ans = Some(ans),
            Err(e) => {
                let (rc, ms) = wire_status(&e);
                return McaaAnswer {
                    session_id: req.session_id,
                    result_code: rc,
                    magic_status_code: Some(ms),
                    granted_status_info: Some(granted_level.code()),
                    comm_ans: None,
                };
            }
        }
    }

    let session_id = session.session_id.clone();
    let _ = state.sessions.insert(session);

    McaaAnswer {
        session_id,
        result_code: ResultCode::Success.code(),
        magic_status_code: Some(MagicStatus::Success.code()),
        granted_status_info: Some(granted_level.code()),
        comm_ans,
    }
}

/// Resolve the client's dataplane-facing IP: a non-aware client's static
/// configured address, or — for a MAGIC_AWARE client — the address
/// recorded by the transport layer when the connection was accepted.
fn client_ip(session: &ClientSession, profile: &ClientProfile) -> Ipv4Addr {
    match &profile.auth {
        ClientAuth::NonAware { source_ip, .. } => *source_ip,
        ClientAuth::MagicAware { .. } => session
            .metadata
            .get("client_ip")
            .and_then(|s| s.parse().ok())
            .unwrap_or(Ipv4Addr::UNSPECIFIED),
    }
}

fn select_and_grant<E: KernelExecutor>(
    state: &GatewayState<E>,
    profile: &ClientProfile,
    traffic_class: TrafficClass,
    requested_bw_kbps: u32,
) -> Result<GrantedPath, MagicError> {
    let links = state.links_snapshot();
    let decision = magic_policy::select_path(&state.config.policy_rule_sets, state.current_phase(), traffic_class, &links);
    let link_id = decision.selected_link_id.ok_or(MagicError::NoFreeBandwidth)?;
    let link = links.get(&link_id).ok_or(MagicError::NoFreeBandwidth)?;

    let cap = profile.limits.max_session_bw_kbps;
    let granted = requested_bw_kbps.min(link.available_bw_kbps()).min(cap);
    Ok(GrantedPath {
        link_id,
        link_ip: link.dynamic.ip_address,
        available_bw_kbps: granted,
    })
}

/// Parse and whitelist-check every TFT string for one direction without
/// touching the dataplane. Called before any Layer-B/C mutation so a
/// rejected TFT never leaves orphan kernel state (spec §8 invariant 4).
fn validate_tft_strings(
    tft_strings: &[String],
    whitelist: &[String],
    direction: Direction,
) -> Result<Vec<(magic_tft::TftRule, Direction)>, MagicError> {
    tft_strings
        .iter()
        .map(|tft_str| {
            validate_tft(tft_str, whitelist)
                .map(|rule| (rule, direction))
                .map_err(|e| MagicError::TftInvalid(e.to_string()))
        })
        .collect()
}

/// Install already-validated TFT rules. If any install fails partway
/// through, the rules installed earlier in this same call are rolled back
/// via `remove_tft_rule` before the error is returned.
fn install_validated_tft_rules<E: KernelExecutor>(
    state: &GatewayState<E>,
    ip: Ipv4Addr,
    link_id: &str,
    rules: Vec<(magic_tft::TftRule, Direction)>,
) -> Result<Vec<BoundTftRule>, MagicError> {
    let mut installed: Vec<BoundTftRule> = Vec::new();
    for (rule, direction) in rules {
        let handle = ids::rule_id();
        if let Err(e) = state.dataplane.install_tft_rule(&handle, ip, link_id, &rule) {
            for bound in installed.drain(..) {
                let _ = state.dataplane.remove_tft_rule(&bound.handle);
            }
            return Err(MagicError::DataplaneFailure(e.to_string()));
        }
        installed.push(BoundTftRule { handle, rule, direction });
    }
    Ok(installed)
}

fn validate_napt_rules(
    profile: &ClientProfile,
    napt_strings: &[String],
    link_ip: Ipv4Addr,
) -> Result<(), MagicError> {
    for napt_str in napt_strings {
        let rule = NaptRule::parse(napt_str).map_err(|e| MagicError::NaptInvalid(e.to_string()))?;
        validate_napt(
            &rule,
            link_ip,
            profile.whitelist.dest_ip_range,
            profile.whitelist.dest_port_range,
            &profile.whitelist.allowed_protocols,
        )
        .map_err(|e| MagicError::NaptInvalid(e.to_string()))?;
    }
    Ok(())
}

fn grant_communication<E: KernelExecutor>(
    state: &GatewayState<E>,
    session: &mut ClientSession,
    profile: &ClientProfile,
    comm_req: &magic_diameter::commands::CommunicationRequestParams,
    now_unix: u64,
) -> Result<CommunicationAnswerParams, MagicError> {
    let requested = comm_req.requested_bw_kbps.unwrap_or(0);
    let ip = client_ip(session, profile);

    if requested == 0 {
        for bound in session.tft_rules.drain(..) {
            let _ = state.dataplane.remove_tft_rule(&bound.handle);
        }
        session.stop_active(now_unix).map_err(|e| MagicError::Internal(e.to_string()))?;
        return Ok(CommunicationAnswerParams {
            profile_name: comm_req.profile_name.clone(),
            granted_bw_kbps: 0,
            granted_ret_bw_kbps: 0,
            ..Default::default()
        });
    }

    let granted = select_and_grant(state, profile, profile.system_role, requested);
    let granted = match granted {
        Ok(g) => g,
        Err(e) if comm_req.keep_request => {
            session.queue(now_unix).map_err(|fe| MagicError::Internal(fe.to_string()))?;
            session.queued_grant = Some(QueuedGrant {
                profile_name: comm_req.profile_name.clone(),
                requested_bw_kbps: requested,
                qos_level: comm_req.qos_level,
                tft_to_ground: comm_req.tft_to_ground.clone(),
                tft_to_aircraft: comm_req.tft_to_aircraft.clone(),
                napt_rules: comm_req.napt_rules.clone(),
                accounting_enabled: comm_req.accounting_enabled,
                timeout_s: comm_req.timeout_s,
            });
            let _ = e;
            return Ok(CommunicationAnswerParams {
                profile_name: comm_req.profile_name.clone(),
                granted_bw_kbps: 0,
                granted_ret_bw_kbps: 0,
                ..Default::default()
            });
        }
        Err(e) => return Err(e),
    };

    validate_napt_rules(profile, &comm_req.napt_rules, granted.link_ip)?;

    // Every TFT string must pass whitelist validation before any Layer-B/C
    // dataplane mutation happens, so a rejected request never leaves orphan
    // kernel state behind (spec §8 invariant 4).
    let mut validated = validate_tft_strings(&comm_req.tft_to_ground, &profile.whitelist.allowed_tfts, Direction::ToGround)?;
    validated.extend(validate_tft_strings(
        &comm_req.tft_to_aircraft,
        &profile.whitelist.allowed_tfts,
        Direction::ToAircraft,
    )?);

    state
        .dataplane
        .setup_client_link_access(ip, granted.link_ip, None)
        .map_err(|e| MagicError::DataplaneFailure(e.to_string()))?;

    let bound = match install_validated_tft_rules(state, ip, &granted.link_id, validated) {
        Ok(bound) => bound,
        Err(e) => {
            let _ = state.dataplane.rollback_client_link_access(ip, granted.link_ip, None);
            return Err(e);
        }
    };

    session
        .start_active(granted.available_bw_kbps, 0, granted.link_id.clone(), now_unix)
        .map_err(|e| MagicError::Internal(e.to_string()))?;
    session.tft_rules = bound;
    session.metadata.insert("client_ip".to_string(), ip.to_string());
    session.accounting_enabled = comm_req.accounting_enabled;
    session.session_timeout_s = comm_req.timeout_s.unwrap_or(0);
    session.keep_request = comm_req.keep_request;

    if session.accounting_enabled && session.active_cdr_id.is_none() {
        let cdr_id = ids::cdr_id();
        state.cdr_ledger.open(&session.session_id, cdr_id.clone(), now_unix);
        session.active_cdr_id = Some(cdr_id);
    }

    Ok(CommunicationAnswerParams {
        profile_name: comm_req.profile_name.clone(),
        granted_bw_kbps: granted.available_bw_kbps,
        granted_ret_bw_kbps: 0,
        selected_link_name: Some(granted.link_id),
        gateway_ip: Some(granted.link_ip),
        qos_level: comm_req.qos_level,
        session_timeout_s: comm_req.timeout_s,
        tft_to_ground: comm_req.tft_to_ground.clone(),
        tft_to_aircraft: comm_req.tft_to_aircraft.clone(),
    })
}

/// Re-attempt a parked QUEUED session's grant now that bandwidth may have
/// freed up (spec §5 "Cancellation/timeout", seed S4). Returns `Some`
/// with a nonzero `granted_bw_kbps` only on a successful promotion; on
/// failure the session stays QUEUED with its parked request intact.
pub(crate) fn try_promote_queued<E: KernelExecutor>(
    state: &GatewayState<E>,
    session: &mut ClientSession,
    profile: &ClientProfile,
    now_unix: u64,
) -> Option<CommunicationAnswerParams> {
    let grant = session.queued_grant.clone()?;
    let comm_req = magic_diameter::commands::CommunicationRequestParams {
        profile_name: grant.profile_name,
        requested_bw_kbps: Some(grant.requested_bw_kbps),
        qos_level: grant.qos_level,
        tft_to_ground: grant.tft_to_ground,
        tft_to_aircraft: grant.tft_to_aircraft,
        napt_rules: grant.napt_rules,
        accounting_enabled: grant.accounting_enabled,
        timeout_s: grant.timeout_s,
        keep_request: true,
        ..Default::default()
    };
    match grant_communication(state, session, profile, &comm_req, now_unix) {
        Ok(ans) if ans.granted_bw_kbps > 0 => Some(ans),
        _ => None,
    }
}

pub fn handle_mccr<E: KernelExecutor>(state: &GatewayState<E>, req: MccrRequest, now_unix: u64) -> MccaAnswer {
    let session_id = req.session_id.clone();
    let profile = match state
        .sessions
        .with_session(&session_id, |s| s.client_id.clone())
        .ok()
        .and_then(|client_id| state.config.client_profiles.iter().find(|p| p.client_id == client_id).cloned())
    {
        Some(p) => p,
        None => {
            let (rc, ms) = wire_status(&MagicError::UnknownSession(session_id.clone()));
            return MccaAnswer {
                session_id,
                result_code: rc,
                magic_status_code: Some(ms),
                comm_ans: None,
            };
        }
    };

    let outcome = state.sessions.with_session(&session_id, |session| {
        grant_communication(state, session, &profile, &req.comm_req, now_unix)
    });

    match outcome {
        Ok(Ok(comm_ans)) => MccaAnswer {
            session_id,
            result_code: ResultCode::Success.code(),
            magic_status_code: Some(MagicStatus::Success.code()),
            comm_ans: Some(comm_ans),
        },
        Ok(Err(e)) => {
            let (rc, ms) = wire_status(&e);
            MccaAnswer { session_id, result_code: rc, magic_status_code: Some(ms), comm_ans: None }
        }
        Err(e) => {
            let (rc, ms) = wire_status(&MagicError::UnknownSession(e.to_string()));
            MccaAnswer { session_id, result_code: rc, magic_status_code: Some(ms), comm_ans: None }
        }
    }
}

pub fn handle_msxr<E: KernelExecutor>(state: &GatewayState<E>, req: MsxrRequest) -> Vec<Avp> {
    use magic_diameter::commands::MscrStatusBroadcast;

    let granted_type = state
        .sessions
        .with_session(&req.session_id, |s| s.subscribe_level.code().min(req.status_type))
        .unwrap_or(0);

    let mut by_dlm: std::collections::BTreeMap<String, magic_diameter::commands::DlmInfo> = std::collections::BTreeMap::new();
    for link in state.registry.iterate_links() {
        let status = magic_diameter::commands::LinkStatus {
            link_number: link.assigned_id,
            link_available: link.dynamic.is_up,
            link_name: Some(link.link_id.clone()),
        };
        by_dlm
            .entry(link.dlm_driver_id.clone())
            .or_insert_with(|| magic_diameter::commands::DlmInfo {
                dlm_name: link.dlm_driver_id.clone(),
                dlm_available: link.dynamic.is_up,
                links: Vec::new(),
            })
            .links
            .push(status);
    }
    let dlm_list: Vec<_> = by_dlm.into_values().collect();

    let broadcast = MscrStatusBroadcast { session_id: req.session_id, status_type: granted_type, dlm_list };
    let mut avps = broadcast.to_avps();
    avps.push(Avp::base(
        magic_diameter::dictionary::base_avp::RESULT_CODE,
        magic_diameter::avp::AvpValue::Unsigned32(ResultCode::Success.code()),
    ));
    avps
}

pub fn handle_madr<E: KernelExecutor>(state: &GatewayState<E>, req: MadrRequest) -> MadaAnswer {
    match req.query {
        AccountingDataQuery::List => MadaAnswer {
            session_id: req.session_id,
            result_code: ResultCode::Success.code(),
            active: state.cdr_ledger.list_by_state(CdrState::Active).into_iter().map(to_cdr_info).collect(),
            finished: state.cdr_ledger.list_by_state(CdrState::Finished).into_iter().map(to_cdr_info).collect(),
            forwarded: state.cdr_ledger.list_by_state(CdrState::Forwarded).into_iter().map(to_cdr_info).collect(),
            unknown: state.cdr_ledger.list_by_state(CdrState::Unknown).into_iter().map(to_cdr_info).collect(),
        },
        AccountingDataQuery::Data => {
            let cdr_id = req.cdr_request_id.unwrap_or_default();
            match state.cdr_ledger.get(&cdr_id) {
                Some(cdr) => MadaAnswer {
                    session_id: req.session_id,
                    result_code: ResultCode::Success.code(),
                    active: vec![to_cdr_info(cdr)],
                    ..Default::default()
                },
                None => MadaAnswer {
                    session_id: req.session_id,
                    result_code: ResultCode::InvalidAvpValue.code(),
                    ..Default::default()
                },
            }
        }
    }
}

fn to_cdr_info(cdr: magic_session::Cdr) -> CdrInfo {
    CdrInfo { cdr_id: cdr.cdr_id, content: cdr.content }
}

pub fn handle_macr<E: KernelExecutor>(state: &GatewayState<E>, req: MacrRestartRequest, now_unix: u64) -> MacaAnswer {
    let new_cdr_id = ids::cdr_id();
    match state.cdr_ledger.restart(&req.session_id, new_cdr_id, now_unix) {
        Ok((stopped, started)) => {
            let _ = state.sessions.with_session(&req.session_id, |s| s.active_cdr_id = Some(started.clone()));
            MacaAnswer {
                session_id: req.session_id,
                result_code: ResultCode::Success.code(),
                start_stop_pair: Some((stopped, started)),
            }
        }
        Err(e) => {
            tracing::debug!(reason = %e, "MACR restart failed");
            MacaAnswer {
                session_id: req.session_id,
                result_code: ResultCode::UnableToComply.code(),
                start_stop_pair: None,
            }
        }
    }
}

/// Dispatch an inbound request to its handler, returning the answer
/// message. Unsupported command codes get `DIAMETER_COMMAND_UNSUPPORTED`.
pub fn dispatch<E: KernelExecutor>(state: &GatewayState<E>, request: &DiameterMessage, now_unix: u64) -> DiameterMessage {
    match request.command_code {
        CMD_MCAR_CODE => match McarRequest::from_avps(&request.avps) {
            Ok(req) => DiameterMessage::answer_to(request, handle_mcar(state, req, now_unix).to_avps()),
            Err(e) => missing_avp_answer(request, &e),
        },
        CMD_MCCR_CODE => match MccrRequest::from_avps(&request.avps) {
            Ok(req) => DiameterMessage::answer_to(request, handle_mccr(state, req, now_unix).to_avps()),
            Err(e) => missing_avp_answer(request, &e),
        },
        CMD_MSXR_CODE => match MsxrRequest::from_avps(&request.avps) {
            Ok(req) => DiameterMessage::answer_to(request, handle_msxr(state, req)),
            Err(e) => missing_avp_answer(request, &e),
        },
        CMD_MADR_CODE => match MadrRequest::from_avps(&request.avps) {
            Ok(req) => DiameterMessage::answer_to(request, handle_madr(state, req).to_avps()),
            Err(e) => missing_avp_answer(request, &e),
        },
        CMD_MACR_CODE => match MacrRestartRequest::from_avps(&request.avps) {
            Ok(req) => DiameterMessage::answer_to(request, handle_macr(state, req, now_unix).to_avps()),
            Err(e) => missing_avp_answer(request, &e),
        },
        _ => DiameterMessage::answer_to(
            request,
            vec![Avp::base(
                magic_diameter::dictionary::base_avp::RESULT_CODE,
                magic_diameter::avp::AvpValue::Unsigned32(ResultCode::CommandUnsupported.code()),
            )],
        ),
    }
}

fn missing_avp_answer(request: &DiameterMessage, e: &magic_diameter::commands::CommandDecodeError) -> DiameterMessage {
    tracing::warn!(error = %e, "rejecting malformed request");
    DiameterMessage::answer_to(
        request,
        vec![Avp::base(
            magic_diameter::dictionary::base_avp::RESULT_CODE,
            magic_diameter::avp::AvpValue::Unsigned32(ResultCode::MissingAvp.code()),
        )],
    )
}
