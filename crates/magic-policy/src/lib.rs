//! C4 — the path-selection policy engine: flight-phase/traffic-class rule
//! lookup, PROHIBIT short-circuiting, and weighted link scoring.

pub mod engine;

pub use engine::{select_path, PathSelectionDecision, RankedPath};
