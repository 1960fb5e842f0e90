// =============================================================================
// Risk engine — active-risk aggregation, equity mark-to-market, R:R checks
// =============================================================================
//
// Risk per open position is `|entry - stop| * quantity`; an invalid bracket
// (risk_per_unit <= 0) is excluded from the sum rather than panicking, since
// `Position::is_valid` is meant to prevent that state from ever existing —
// this is a last-line defense, not the primary guard.

use std::collections::HashMap;

use crate::position::Position;
use crate::types::Side;

#[derive(Debug, Clone)]
pub struct ActiveRisk {
    pub total_risk_usd: f64,
    pub max_allowed_risk_usd: f64,
    pub risk_pct_of_equity: f64,
    pub within_limits: bool,
    pub position_count: usize,
}

fn risk_per_unit(position: &Position) -> Option<f64> {
    let risk = match position.side {
        Side::Long => position.entry_price - position.stop,
        Side::Short => position.stop - position.entry_price,
    };
    (risk > 0.0).then_some(risk)
}

pub fn position_risk_usd(position: &Position) -> Option<f64> {
    risk_per_unit(position).map(|r| r * position.quantity)
}

/// Aggregate open-position risk against equity, plus a candidate trade not
/// yet booked as a `Position`. Positions with an invalid (non-positive)
/// risk-per-unit are skipped and do not count toward the total.
pub fn active_risk(positions: &[Position], candidate_risk_usd: f64, equity: f64, max_active_risk_pct: f64) -> ActiveRisk {
    let total_risk_usd: f64 = positions.iter().filter_map(position_risk_usd).sum::<f64>() + candidate_risk_usd.max(0.0);
    let max_allowed_risk_usd = equity * (max_active_risk_pct / 100.0);
    let risk_pct_of_equity = if equity > 0.0 {
        total_risk_usd / equity * 100.0
    } else {
        0.0
    };
    ActiveRisk {
        total_risk_usd,
        max_allowed_risk_usd,
        risk_pct_of_equity,
        within_limits: total_risk_usd <= max_allowed_risk_usd,
        position_count: positions.len(),
    }
}

/// Mark-to-market equity: realized equity (cash + closed P&L already folded
/// into the exchange balance) plus unrealized P&L across every open position.
pub fn mark_to_market_equity(realized_equity: f64, open_positions: &[Position], marks: &HashMap<String, f64>) -> f64 {
    let unrealized: f64 = open_positions
        .iter()
        .filter_map(|p| marks.get(&p.symbol).map(|&mark| p.unrealized_pnl(mark)))
        .sum();
    realized_equity + unrealized
}

/// Reward-to-risk ratio for a proposed entry: `|target - entry| / |entry - stop|`.
/// Returns `None` when the stop distance is zero (undefined ratio).
pub fn reward_to_risk(entry: f64, stop: f64, target: f64) -> Option<f64> {
    let risk = (entry - stop).abs();
    if risk <= 0.0 {
        return None;
    }
    Some((target - entry).abs() / risk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position(symbol: &str, entry: f64, stop: f64, target: f64, qty: f64) -> Position {
        // Position has no public constructor outside PositionBook, so we
        // build via the book and pull it back out for these unit tests.
        let book = crate::position::PositionBook::new();
        book.open(symbol, Side::Long, qty, entry, stop, target, 0, "d1")
            .unwrap();
        book.get(symbol).unwrap()
    }

    #[test]
    fn active_risk_sums_valid_positions_only() {
        let p1 = long_position("BTC/USD", 100.0, 98.0, 106.0, 1.0); // risk 2
        let p2 = long_position("ETH/USD", 50.0, 49.0, 53.0, 2.0); // risk 2
        let risk = active_risk(&[p1, p2], 0.0, 1000.0, 5.0);
        assert_eq!(risk.total_risk_usd, 4.0);
        assert_eq!(risk.max_allowed_risk_usd, 50.0);
        assert!(risk.within_limits);
    }

    #[test]
    fn active_risk_exceeding_cap_is_flagged() {
        let p1 = long_position("BTC/USD", 100.0, 50.0, 200.0, 10.0); // risk 500
        let risk = active_risk(&[p1], 0.0, 1000.0, 5.0);
        assert!(!risk.within_limits);
    }

    #[test]
    fn active_risk_includes_the_candidate_trades_own_risk() {
        let p1 = long_position("BTC/USD", 100.0, 98.0, 106.0, 1.0); // risk 2
        let within = active_risk(&[p1.clone()], 10.0, 1000.0, 5.0); // 2 + 10 = 12 <= 50
        assert!(within.within_limits);
        assert_eq!(within.total_risk_usd, 12.0);

        let over = active_risk(&[p1], 100.0, 1000.0, 5.0); // 2 + 100 = 102 > 50
        assert!(!over.within_limits);
    }

    #[test]
    fn mark_to_market_adds_unrealized_pnl() {
        let p1 = long_position("BTC/USD", 100.0, 98.0, 110.0, 1.0);
        let mut marks = HashMap::new();
        marks.insert("BTC/USD".to_string(), 105.0);
        let equity = mark_to_market_equity(10_000.0, &[p1], &marks);
        assert_eq!(equity, 10_005.0);
    }

    #[test]
    fn reward_to_risk_computes_ratio() {
        assert_eq!(reward_to_risk(100.0, 98.0, 106.0), Some(3.0));
        assert_eq!(reward_to_risk(100.0, 100.0, 106.0), None);
    }
}
