//! C2 — the kernel dataplane controller: policy routing, NAT, ipset
//! gating, and per-TFT mangle/filter rules.

pub mod errors;
pub mod executor;
pub mod layers;

pub use errors::DataplaneError;
pub use executor::{ExecError, KernelExecutor, RecordingExecutor, SystemExecutor};
pub use layers::DataplaneController;
