//! Read-only HTTP snapshot surface for the external CLI/admin collaborator
//! (spec §5: "CLI / admin: read-only snapshots only").

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use magic_dataplane::KernelExecutor;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;

#[derive(Serialize)]
struct LinkSnapshot {
    link_id: String,
    dlm_driver_id: String,
    is_up: bool,
    available_bw_kbps: u32,
    load_percent: f64,
}

#[derive(Serialize)]
struct SessionSnapshot {
    session_id: String,
    client_id: String,
    state: String,
    selected_link_id: Option<String>,
    granted_bw_kbps: u32,
    subscribe_level: u32,
}

#[derive(Serialize)]
struct FleetSnapshot {
    flight_phase: String,
    links: Vec<LinkSnapshot>,
    sessions: Vec<SessionSnapshot>,
}

fn session_state_name(s: magic_session::SessionState) -> &'static str {
    match s {
        magic_session::SessionState::Idle => "IDLE",
        magic_session::SessionState::Authenticating => "AUTHENTICATING",
        magic_session::SessionState::Authenticated => "AUTHENTICATED",
        magic_session::SessionState::Active => "ACTIVE",
        magic_session::SessionState::Queued => "QUEUED",
        magic_session::SessionState::Terminating => "TERMINATING",
    }
}

async fn get_snapshot<E: KernelExecutor>(State(state): State<Arc<GatewayState<E>>>) -> Json<FleetSnapshot> {
    let links = state
        .registry
        .iterate_links()
        .into_iter()
        .map(|l| LinkSnapshot {
            link_id: l.link_id.clone(),
            dlm_driver_id: l.dlm_driver_id.clone(),
            is_up: l.dynamic.is_up,
            available_bw_kbps: l.available_bw_kbps(),
            load_percent: l.load_percent(),
        })
        .collect();

    let sessions = state
        .sessions
        .snapshot()
        .into_iter()
        .map(|s| SessionSnapshot {
            session_id: s.session_id,
            client_id: s.client_id,
            state: session_state_name(s.state).to_string(),
            selected_link_id: s.selected_link_id,
            granted_bw_kbps: s.granted_bw_kbps,
            subscribe_level: s.subscribe_level.code(),
        })
        .collect();

    Json(FleetSnapshot { flight_phase: format!("{:?}", state.current_phase()), links, sessions })
}

/// Build the admin router. The caller binds and serves it (see `main.rs`).
pub fn router<E: KernelExecutor + 'static>(state: Arc<GatewayState<E>>) -> Router {
    Router::new()
        .route("/snapshot", get(get_snapshot::<E>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
