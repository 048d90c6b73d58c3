//! Shared gateway state, owned by the [`crate::orchestrator::Orchestrator`]
//! and handed by reference to the dispatcher, broadcaster, and admin
//! surfaces (spec §5 shared-resource list).

use std::sync::Arc;

use arc_swap::ArcSwap;
use magic_common::config::MagicConfig;
use magic_common::model::FlightPhase;
use magic_dataplane::{DataplaneController, KernelExecutor};
use magic_registry::DlmRegistry;
use magic_session::{CdrLedger, SessionTable};

/// Everything the dispatcher, broadcaster, and housekeeping ticker share.
/// `flight_phase` is the one piece of state that changes underneath
/// in-flight requests — `ArcSwap` gives lock-free reads, so a request
/// decoded just before a phase transition still sees a consistent phase
/// value. The orchestrator re-evaluates every ACTIVE session's selection
/// against the new phase right after the swap (spec §4.4 step 5).
pub struct GatewayState<E: KernelExecutor> {
    pub config: Arc<MagicConfig>,
    pub sessions: Arc<SessionTable>,
    pub registry: Arc<DlmRegistry>,
    pub dataplane: Arc<DataplaneController<E>>,
    pub cdr_ledger: Arc<CdrLedger>,
    pub flight_phase: Arc<ArcSwap<FlightPhase>>,
}

impl<E: KernelExecutor> GatewayState<E> {
    pub fn new(config: MagicConfig, dataplane: Arc<DataplaneController<E>>) -> Self {
        GatewayState {
            config: Arc::new(config),
            sessions: Arc::new(SessionTable::new()),
            registry: Arc::new(DlmRegistry::new()),
            dataplane,
            cdr_ledger: Arc::new(CdrLedger::new()),
            flight_phase: Arc::new(ArcSwap::from_pointee(FlightPhase::Parked)),
        }
    }

    pub fn current_phase(&self) -> FlightPhase {
        **self.flight_phase.load()
    }

    /// Atomic flight-phase transition (spec §8 invariant 7).
    pub fn set_flight_phase(&self, phase: FlightPhase) {
        self.flight_phase.store(Arc::new(phase));
    }

    pub fn links_snapshot(&self) -> std::collections::HashMap<String, magic_common::model::Link> {
        self.registry
            .iterate_links()
            .into_iter()
            .map(|l| (l.link_id.clone(), l))
            .collect()
    }
}
