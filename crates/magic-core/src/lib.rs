//! C7 — the MAGIC gateway orchestrator: dispatches Diameter commands
//! against the session, policy, registry, and dataplane layers (C1-C6).

pub mod admin;
pub mod broadcaster;
pub mod dispatcher;
pub mod housekeeping;
pub mod orchestrator;
pub mod state;
pub mod transport;

pub use orchestrator::Orchestrator;
pub use state::GatewayState;
pub use transport::{ChannelTransport, DiameterTransport, TransportError};
