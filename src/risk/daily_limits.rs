// =============================================================================
// Daily trade limits — shared across paper and live modes
// =============================================================================
//
// Critical: the counters do NOT reset when the account mode changes. They
// reset only on a UTC calendar date rollover. One instance of this tracker
// is shared by both paper and live execution paths so a day's trade budget
// can never be doubled by switching modes mid-session.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLimitsSnapshot {
    pub date: String,
    pub total_trades: u32,
    pub trades_by_symbol: HashMap<String, u32>,
    pub max_total: u32,
    pub max_per_symbol: u32,
}

struct Inner {
    date: String,
    total_trades: u32,
    trades_by_symbol: HashMap<String, u32>,
}

pub struct DailyLimits {
    inner: RwLock<Inner>,
    max_total: u32,
    max_per_symbol: u32,
}

impl DailyLimits {
    pub fn new(max_total: u32, max_per_symbol: u32) -> Self {
        Self {
            inner: RwLock::new(Inner {
                date: Utc::now().date_naive().to_string(),
                total_trades: 0,
                trades_by_symbol: HashMap::new(),
            }),
            max_total,
            max_per_symbol,
        }
    }

    fn roll_if_new_day(&self, inner: &mut Inner) {
        let today = Utc::now().date_naive().to_string();
        if inner.date != today {
            info!(old_date = %inner.date, new_date = %today, "daily trade limits reset for new day");
            inner.date = today;
            inner.total_trades = 0;
            inner.trades_by_symbol.clear();
        }
    }

    /// Check, without mutating state, whether a new trade may be opened for
    /// `symbol`. Returns `Err(reason)` when either cap would be exceeded.
    pub fn can_open(&self, symbol: &str) -> Result<(), String> {
        let mut inner = self.inner.write();
        self.roll_if_new_day(&mut inner);

        if inner.total_trades >= self.max_total {
            return Err(format!(
                "daily total trade limit reached ({}/{})",
                inner.total_trades, self.max_total
            ));
        }
        let symbol_count = inner.trades_by_symbol.get(symbol).copied().unwrap_or(0);
        if symbol_count >= self.max_per_symbol {
            return Err(format!(
                "daily limit for {symbol} reached ({symbol_count}/{})",
                self.max_per_symbol
            ));
        }
        Ok(())
    }

    pub fn record(&self, symbol: &str) {
        let mut inner = self.inner.write();
        self.roll_if_new_day(&mut inner);
        inner.total_trades += 1;
        *inner.trades_by_symbol.entry(symbol.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> DailyLimitsSnapshot {
        let mut inner = self.inner.write();
        self.roll_if_new_day(&mut inner);
        DailyLimitsSnapshot {
            date: inner.date.clone(),
            total_trades: inner.total_trades,
            trades_by_symbol: inner.trades_by_symbol.clone(),
            max_total: self.max_total,
            max_per_symbol: self.max_per_symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_trades_within_both_caps() {
        let limits = DailyLimits::new(30, 10);
        assert!(limits.can_open("BTC/USD").is_ok());
        limits.record("BTC/USD");
        assert_eq!(limits.snapshot().total_trades, 1);
    }

    #[test]
    fn blocks_once_per_symbol_cap_hit() {
        let limits = DailyLimits::new(30, 2);
        limits.record("BTC/USD");
        limits.record("BTC/USD");
        assert!(limits.can_open("BTC/USD").is_err());
        assert!(limits.can_open("ETH/USD").is_ok());
    }

    #[test]
    fn blocks_once_total_cap_hit_regardless_of_symbol() {
        let limits = DailyLimits::new(2, 10);
        limits.record("BTC/USD");
        limits.record("ETH/USD");
        assert!(limits.can_open("SOL/USD").is_err());
    }

    #[test]
    fn counters_are_shared_across_modes_not_reset_by_caller() {
        // The tracker has no notion of "mode" at all — both paper and live
        // callers share the same instance, so there is nothing to reset.
        let limits = DailyLimits::new(30, 10);
        limits.record("BTC/USD"); // simulated "paper" call site
        limits.record("BTC/USD"); // simulated "live" call site
        assert_eq!(
            limits.snapshot().trades_by_symbol.get("BTC/USD").copied(),
            Some(2)
        );
    }
}
