// =============================================================================
// Decision — auditable record of every trade/no-trade verdict
// =============================================================================
//
// Exactly one `Decision` is written per (symbol, tick), before any order is
// placed for it, so a crash between decision and execution never leaves an
// order with no paper trail (spec §5: Decision MUST precede Trade).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::regime::Regime;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
    Skip,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// Snapshot of the indicator values that fed this decision, preserved for
/// audit independent of whatever the live indicator cache holds later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub atr: f64,
    pub adx: f64,
    pub sma_fast: f64,
    pub sma_slow: f64,
    pub bb_width_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub ts: i64,
    pub symbol: String,
    pub action: Action,
    pub side: Option<Side>,
    pub reason: String,
    pub regime: Regime,
    pub confidence: f64,
    pub indicators: IndicatorSnapshot,
    pub executed: bool,
}

impl Decision {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        action: Action,
        side: Option<Side>,
        reason: impl Into<String>,
        regime: Regime,
        confidence: f64,
        indicators: IndicatorSnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now().timestamp_millis(),
            symbol: symbol.into(),
            action,
            side,
            reason: reason.into(),
            regime,
            confidence,
            indicators,
            executed: false,
        }
    }

    pub fn mark_executed(mut self) -> Self {
        self.executed = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            price: 100.0,
            atr: 1.0,
            adx: 30.0,
            sma_fast: 99.0,
            sma_slow: 97.0,
            bb_width_pct: 2.0,
        }
    }

    #[test]
    fn new_decision_is_unexecuted_by_default() {
        let d = Decision::new(
            "BTC/USD",
            Action::Buy,
            Some(Side::Long),
            "trend up setup",
            Regime::TrendUp,
            0.8,
            snapshot(),
        );
        assert!(!d.executed);
        assert_eq!(d.action, Action::Buy);
    }

    #[test]
    fn mark_executed_flips_flag() {
        let d = Decision::new(
            "BTC/USD",
            Action::Hold,
            None,
            "no setup",
            Regime::NoTrade,
            0.0,
            snapshot(),
        )
        .mark_executed();
        assert!(d.executed);
    }
}
