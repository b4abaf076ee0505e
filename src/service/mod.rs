//! Diagnosis orchestration.
//!
//! [`DiagnosisService`] is the entry point for callers: it validates input,
//! runs the active inference strategy, persists the session and rebuilds
//! explanations for stored cases.

mod diagnosis;

pub use diagnosis::{DiagnosisService, MAX_PATIENT_ID_LEN};
