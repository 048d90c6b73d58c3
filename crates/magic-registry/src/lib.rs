//! C3 — the DLM registry and its UNIX-socket IPC server.

pub mod ipc;
pub mod registry;
pub mod server;

pub use registry::{DlmRegistry, RegistryError};
pub use server::RegistryEvent;
