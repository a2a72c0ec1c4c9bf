//! The Enumeration Engine: phase state machine, failure
//! classification and retry scheduling for newly-discovered entities.

pub mod classify;
pub mod engine;

pub use classify::{classify_phase_failure, PhaseOutcome};
pub use engine::{EnumerationEngine, EnumerationHooks, PhaseInputs};
