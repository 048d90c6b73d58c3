//! The 1s-granularity ticker: heartbeat-timeout scanning, session-timeout
//! scanning, and the periodic status snapshot broadcast (spec §5, §4.6).

use std::time::Duration;

use magic_dataplane::KernelExecutor;
use magic_session::StatusLevel;

use crate::broadcaster;
use crate::state::GatewayState;
use crate::transport::DiameterTransport;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const HEARTBEAT_TIMEOUT_S: u64 = 30;
const STATUS_SNAPSHOT_INTERVAL_S: u64 = 30;

/// Drives liveness scanning and periodic status snapshots until the
/// process shuts down. Spawned as its own task by the orchestrator.
pub async fn run<E: KernelExecutor + 'static>(
    state: std::sync::Arc<GatewayState<E>>,
    transport: std::sync::Arc<dyn DiameterTransport>,
) {
    let mut ticks: u64 = 0;
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        interval.tick().await;
        ticks += 1;
        let now_unix = unix_now();

        for link_id in state.registry.scan_heartbeat_timeouts(now_unix, HEARTBEAT_TIMEOUT_S) {
            tracing::warn!(link_id, "heartbeat timeout, link marked down");
            for session_id in state.sessions.sessions_on_link(&link_id) {
                broadcaster::push_link_lost(&state, transport.as_ref(), &session_id, now_unix);
            }
        }

        for session_id in state.sessions.timed_out_sessions(now_unix) {
            tracing::info!(session_id, "session timed out, tearing down");
            terminate_session(&state, transport.as_ref(), &session_id, now_unix);
        }

        if ticks % STATUS_SNAPSHOT_INTERVAL_S == 0 {
            broadcaster::broadcast_status(&state, transport.as_ref(), StatusLevel::All);
        }
    }
}

/// Tear down a session's dataplane state, remove it from the table, and
/// try to promote a QUEUED session into the bandwidth this just freed
/// (shared by session-timeout handling and explicit STR).
pub fn terminate_session<E: KernelExecutor>(
    state: &GatewayState<E>,
    transport: &dyn DiameterTransport,
    session_id: &str,
    now_unix: u64,
) {
    let removed = state.sessions.with_session(session_id, |s| {
        let handles: Vec<String> = s.tft_rules.iter().map(|b| b.handle.clone()).collect();
        let client_ip = s.metadata.get("client_ip").cloned();
        let _ = s.terminate();
        (handles, client_ip)
    });
    if let Ok((handles, client_ip)) = removed {
        if let Some(ip) = client_ip.and_then(|s| s.parse().ok()) {
            if let Err(e) = state.dataplane.teardown_session(ip, &handles) {
                tracing::warn!(session_id, error = %e, "dataplane teardown failed during session termination");
            }
        }
    }
    let _ = state.sessions.remove(session_id);
    broadcaster::promote_queued_sessions(state, transport, now_unix);
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
