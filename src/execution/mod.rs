// =============================================================================
// Execution Module
// =============================================================================
//
// Turns a risk-gate-approved signal into exchange orders via the bracket
// executor's placement/flatten state machine.

pub mod bracket;

pub use bracket::{outcome_anomaly, resolve_size, BracketExecutor, Outcome, SizingRequest};
