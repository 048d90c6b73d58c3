//! Shared types for the MAGIC gateway.
//!
//! This crate contains:
//! - **Data model** — links, flight phases, traffic classes, client profiles
//! - **Status codes** — the Diameter Result-Code and MAGIC-Status-Code taxonomy
//! - **Auth primitives** — Argon2id password verification for `MAGIC_AWARE` clients
//! - **ID generation** — prefixed UUIDv7 helpers (`sess_`, `cdr_`, `rule_`)
//! - **Error type** — the top-level `MagicError` composed by every other crate

pub mod auth;
pub mod config;
pub mod errors;
pub mod ids;
pub mod model;
pub mod status;
