//! Triage API endpoints (§6).

pub mod triage;

pub use triage::{TriageApiState, routes};
