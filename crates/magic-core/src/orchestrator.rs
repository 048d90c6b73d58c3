//! C7 — the gateway orchestrator. Wires C1-C6 together, owns the shared
//! [`GatewayState`], and spawns the housekeeping ticker and admin HTTP
//! server as background tasks (spec §4.6).

use std::net::SocketAddr;
use std::sync::Arc;

use magic_common::config::MagicConfig;
use magic_common::model::FlightPhase;
use magic_dataplane::{DataplaneController, KernelExecutor};
use magic_diameter::dictionary::CMD_MCCR_CODE;
use magic_diameter::DiameterMessage;
use magic_registry::RegistryEvent;
use tokio::sync::broadcast;

use crate::broadcaster;
use crate::housekeeping;
use crate::state::GatewayState;
use crate::transport::DiameterTransport;

/// Owns the gateway's shared state and background tasks. `dispatch` is
/// the only entry point a transport's RX loop needs to call.
pub struct Orchestrator<E: KernelExecutor + 'static> {
    pub state: Arc<GatewayState<E>>,
    transport: Arc<dyn DiameterTransport>,
}

impl<E: KernelExecutor + 'static> Orchestrator<E> {
    pub fn new(config: MagicConfig, dataplane: Arc<DataplaneController<E>>, transport: Arc<dyn DiameterTransport>) -> Self {
        Orchestrator { state: Arc::new(GatewayState::new(config, dataplane)), transport }
    }

    /// Spawn the housekeeping ticker and the admin HTTP listener; returns
    /// their join handles so the caller can fold them into its shutdown
    /// `select!`.
    pub fn spawn_background_tasks(&self, admin_addr: SocketAddr) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let ticker_state = self.state.clone();
        let ticker_transport = self.transport.clone();
        let ticker = tokio::spawn(async move {
            housekeeping::run(ticker_state, ticker_transport).await;
        });

        let admin_state = self.state.clone();
        let admin = tokio::spawn(async move {
            let app = crate::admin::router(admin_state);
            match tokio::net::TcpListener::bind(admin_addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app).await {
                        tracing::error!(error = %e, "admin HTTP server exited");
                    }
                }
                Err(e) => tracing::error!(error = %e, addr = %admin_addr, "failed to bind admin HTTP listener"),
            }
        });

        (ticker, admin)
    }

    /// Consume DLM registry events and react: a link going down pushes
    /// `MNTR`/`LINK_ERROR` to every session currently bound to it (spec
    /// §4.6 step 5). Returns the join handle so callers can fold it into
    /// shutdown `select!`.
    pub fn spawn_registry_event_listener(&self, mut events: broadcast::Receiver<RegistryEvent>) -> tokio::task::JoinHandle<()> {
        let state = self.state.clone();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RegistryEvent::LinkDown { link_id }) => {
                        let now_unix = unix_now();
                        let affected = state.sessions.sessions_on_link(&link_id);
                        reselect_sessions(&state, transport.as_ref(), &affected, now_unix);
                    }
                    Ok(RegistryEvent::LinkRegistered { link_id }) => {
                        tracing::info!(link_id, "link registered with the DLM registry");
                    }
                    Ok(RegistryEvent::LinkStateChanged { link_id }) => {
                        tracing::debug!(link_id, "link dynamic state updated");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "registry event listener lagged, some events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Decode, dispatch, and encode one inbound Diameter request. An MCCR
    /// can free bandwidth (stop or modify-down), so every MCCR is followed
    /// by a QUEUED-promotion scan (spec §5 "Cancellation/timeout", seed S4).
    pub fn handle_request(&self, request: &DiameterMessage, now_unix: u64) -> DiameterMessage {
        let answer = crate::dispatcher::dispatch(&self.state, request, now_unix);
        if request.command_code == CMD_MCCR_CODE {
            broadcaster::promote_queued_sessions(&self.state, self.transport.as_ref(), now_unix);
        }
        answer
    }

    /// Terminate a session explicitly (standard Diameter STR, spec §4.5).
    pub fn terminate_session(&self, session_id: &str) {
        housekeeping::terminate_session(&self.state, self.transport.as_ref(), session_id, unix_now());
    }

    /// Atomically swap the flight phase, then re-evaluate every ACTIVE
    /// session's path selection under the new phase's ruleset (spec §4.4
    /// step 5, seed S2).
    pub fn set_flight_phase(&self, phase: FlightPhase) {
        self.state.set_flight_phase(phase);
        let now_unix = unix_now();
        let active: Vec<String> = self
            .state
            .sessions
            .snapshot()
            .into_iter()
            .filter(|s| s.state == magic_session::SessionState::Active)
            .map(|s| s.session_id)
            .collect();
        reselect_sessions(&self.state, self.transport.as_ref(), &active, now_unix);
    }

    pub fn transport(&self) -> Arc<dyn DiameterTransport> {
        self.transport.clone()
    }
}

/// Re-run path selection for `session_ids` under the current policy
/// ruleset/flight phase, and push the outcome: a link switch (with
/// bandwidth re-capped to the new link) if a replacement exists, or a
/// forced release if none does (spec §4.6 step 5, seed S2).
fn reselect_sessions<E: KernelExecutor>(
    state: &GatewayState<E>,
    transport: &dyn DiameterTransport,
    session_ids: &[String],
    now_unix: u64,
) {
    let links = state.links_snapshot();
    for session_id in session_ids {
        let current = state.sessions.with_session(session_id, |s| (s.client_id.clone(), s.selected_link_id.clone(), s.granted_bw_kbps));
        let (client_id, current_link, current_bw) = match current {
            Ok(v) => v,
            Err(_) => continue,
        };
        let profile = match state.config.client_profiles.iter().find(|p| p.client_id == client_id) {
            Some(p) => p,
            None => continue,
        };
        // select_path never returns a link that isn't currently up (its
        // availability scan excludes down links), so a `Some` here is
        // always a live replacement.
        let decision = magic_policy::select_path(&state.config.policy_rule_sets, state.current_phase(), profile.system_role, &links);

        match decision.selected_link_id {
            Some(new_link_id) if Some(&new_link_id) == current_link.as_ref() => {}
            Some(new_link_id) => {
                let new_bw = links
                    .get(&new_link_id)
                    .map(|l| current_bw.min(l.available_bw_kbps()).min(profile.limits.max_session_bw_kbps))
                    .unwrap_or(0);
                broadcaster::push_link_switch(state, transport, session_id, &new_link_id, new_bw, now_unix);
            }
            None => broadcaster::push_link_lost(state, transport, session_id, now_unix),
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
