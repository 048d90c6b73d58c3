//! Server-initiated pushes: per-session MNTR notifications and fleet-wide
//! MSCR status broadcasts (spec §4.5, §4.6 step 5).

use magic_common::status::MagicStatus;
use magic_dataplane::KernelExecutor;
use magic_diameter::commands::{CommunicationAnswerParams, MntrNotification};
use magic_diameter::dictionary::CMD_MNTR_CODE;
use magic_diameter::DiameterMessage;
use magic_session::StatusLevel;

use crate::state::GatewayState;
use crate::transport::DiameterTransport;

/// Tell a session its link is gone: drop its bearer state and push MNTR
/// with `LINK_ERROR`. The caller (orchestrator) decides whether to also
/// attempt an immediate re-selection before calling this.
pub fn push_link_lost<E: KernelExecutor>(
    state: &GatewayState<E>,
    transport: &dyn DiameterTransport,
    session_id: &str,
    now_unix: u64,
) {
    let tft_handles = match state.sessions.with_session(session_id, |s| {
        let handles: Vec<String> = s.tft_rules.iter().map(|b| b.handle.clone()).collect();
        let client_ip = s.metadata.get("client_ip").cloned();
        let _ = s.link_lost(now_unix);
        (handles, client_ip)
    }) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "push_link_lost: unknown session");
            return;
        }
    };
    let (handles, client_ip) = tft_handles;
    if let Some(ip) = client_ip.and_then(|s| s.parse().ok()) {
        if let Err(e) = state.dataplane.teardown_session(ip, &handles) {
            tracing::warn!(session_id, error = %e, "failed to tear down dataplane state on link loss");
        }
    }

    let notification = MntrNotification {
        session_id: session_id.to_string(),
        magic_status_code: MagicStatus::LinkError.code(),
        comm_report: CommunicationAnswerParams { granted_bw_kbps: 0, ..Default::default() },
    };
    send_mntr(transport, session_id, notification);
}

/// Tell a session it has been moved to a new link. Bearer state (TFT
/// rules) is re-pointed via `switch_tft_rule_link`, not torn down; the
/// granted bandwidth is re-capped to what the new link can offer (spec
/// seed S2).
pub fn push_link_switch<E: KernelExecutor>(
    state: &GatewayState<E>,
    transport: &dyn DiameterTransport,
    session_id: &str,
    new_link_id: &str,
    new_granted_bw_kbps: u32,
    now_unix: u64,
) {
    let handles = match state.sessions.with_session(session_id, |s| {
        let handles: Vec<String> = s.tft_rules.iter().map(|b| b.handle.clone()).collect();
        let _ = s.switch_link(new_link_id.to_string(), now_unix);
        s.granted_bw_kbps = new_granted_bw_kbps;
        handles
    }) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "push_link_switch: unknown session");
            return;
        }
    };
    for handle in &handles {
        if let Err(e) = state.dataplane.switch_tft_rule_link(handle, new_link_id) {
            tracing::warn!(session_id, handle, error = %e, "failed to switch TFT rule to new link");
        }
    }

    let notification = MntrNotification {
        session_id: session_id.to_string(),
        magic_status_code: MagicStatus::ForcedRerouting.code(),
        comm_report: CommunicationAnswerParams {
            selected_link_name: Some(new_link_id.to_string()),
            granted_bw_kbps: new_granted_bw_kbps,
            ..Default::default()
        },
    };
    send_mntr(transport, session_id, notification);
}

fn send_mntr(transport: &dyn DiameterTransport, session_id: &str, notification: MntrNotification) {
    let msg = DiameterMessage::request(CMD_MNTR_CODE, 0, 0, notification.to_avps());
    if let Err(e) = transport.send(session_id, msg) {
        tracing::warn!(session_id, error = %e, "failed to deliver MNTR");
    }
}

/// Scan QUEUED sessions and retry their parked grant now that bandwidth
/// may have freed up; push MNTR with `MAGIC-Status-Code=0` and the granted
/// bandwidth on a successful promotion (spec §5 "Cancellation/timeout",
/// seed S4). Called after any operation that can free bandwidth (an MCCR
/// stop/modify-down, or a session termination).
pub fn promote_queued_sessions<E: KernelExecutor>(state: &GatewayState<E>, transport: &dyn DiameterTransport, now_unix: u64) {
    let queued_ids: Vec<String> = state
        .sessions
        .snapshot()
        .into_iter()
        .filter(|s| s.state == magic_session::SessionState::Queued)
        .map(|s| s.session_id)
        .collect();

    for session_id in queued_ids {
        let client_id = match state.sessions.with_session(&session_id, |s| s.client_id.clone()) {
            Ok(id) => id,
            Err(_) => continue,
        };
        let profile = match state.config.client_profiles.iter().find(|p| p.client_id == client_id) {
            Some(p) => p.clone(),
            None => continue,
        };
        let promoted = state
            .sessions
            .with_session(&session_id, |s| crate::dispatcher::try_promote_queued(state, s, &profile, now_unix));
        let ans = match promoted {
            Ok(Some(ans)) => ans,
            _ => continue,
        };

        let notification = MntrNotification { session_id: session_id.clone(), magic_status_code: MagicStatus::Success.code(), comm_report: ans };
        send_mntr(transport, &session_id, notification);
    }
}

/// Broadcast an MSCR to every session whose subscription covers
/// `published_level` (spec §4.6 step 5).
pub fn broadcast_status<E: KernelExecutor>(
    state: &GatewayState<E>,
    transport: &dyn DiameterTransport,
    published_level: StatusLevel,
) {
    for session in state.sessions.snapshot() {
        if !session.subscribe_level.covers(published_level) {
            continue;
        }
        let reply = crate::dispatcher::handle_msxr(
            state,
            magic_diameter::commands::MsxrRequest {
                session_id: session.session_id.clone(),
                status_type: session.subscribe_level.code(),
            },
        );
        let msg = DiameterMessage::request(magic_diameter::dictionary::CMD_MSCR_CODE, 0, 0, reply);
        if let Err(e) = transport.send(&session.session_id, msg) {
            tracing::warn!(session_id = %session.session_id, error = %e, "failed to deliver MSCR");
        }
    }
}
