// =============================================================================
// Closed error enumeration for the trading control plane
// =============================================================================
//
// These are the domain-significant error kinds callers match on. Anything
// below the control plane (I/O, parsing, serialization) is wrapped in
// `anyhow::Error` with `.context(...)` at the boundary where it crosses into
// one of these kinds.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeRejectKind {
    InsufficientFunds,
    InvalidSize,
    PriceBand,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    DataInsufficient(String),
    ConfigInvalid(String),
    ExchangeTransient(String),
    ExchangeAuth(String),
    ExchangeReject(ExchangeRejectKind, String),
    OrderNotFound(String),
    BracketMinSize(String),
    BracketPlacementFailed(String),
    FlattenFailed(String),
    KillSwitchTripped(String),
    WatchdogUnhealthy(String),
    LogWriteFailed(String),
    InternalInvariantViolation(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataInsufficient(m) => write!(f, "data insufficient: {m}"),
            Self::ConfigInvalid(m) => write!(f, "config invalid: {m}"),
            Self::ExchangeTransient(m) => write!(f, "exchange transient error: {m}"),
            Self::ExchangeAuth(m) => write!(f, "exchange auth error: {m}"),
            Self::ExchangeReject(kind, m) => write!(f, "exchange rejected order ({kind:?}): {m}"),
            Self::OrderNotFound(m) => write!(f, "order not found: {m}"),
            Self::BracketMinSize(m) => write!(f, "bracket below exchange minimum: {m}"),
            Self::BracketPlacementFailed(m) => write!(f, "bracket placement failed: {m}"),
            Self::FlattenFailed(m) => write!(f, "flatten failed: {m}"),
            Self::KillSwitchTripped(m) => write!(f, "kill switch tripped: {m}"),
            Self::WatchdogUnhealthy(m) => write!(f, "watchdog unhealthy: {m}"),
            Self::LogWriteFailed(m) => write!(f, "log write failed: {m}"),
            Self::InternalInvariantViolation(m) => write!(f, "internal invariant violation: {m}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        let e = EngineError::BracketMinSize("qty below min_qty".into());
        assert!(e.to_string().contains("below exchange minimum"));
    }
}
