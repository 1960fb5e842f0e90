// =============================================================================
// RuntimeState — the engine's single mutable-but-small control surface
// =============================================================================
//
// Everything here is cheap to snapshot and cheap to flip: the global
// pause/kill switch, the daily trade limits, the profit target, and the
// watchdog. Each sub-component already manages its own interior mutability
// (`parking_lot::RwLock`), so `RuntimeState` itself just groups ownership —
// it holds no lock of its own.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::risk::{DailyLimits, ProfitTarget, Watchdog};
use crate::types::TradingMode;

pub struct RuntimeState {
    trading_mode: AtomicTradingMode,
    pub daily_limits: DailyLimits,
    pub profit_target: ProfitTarget,
    pub watchdog: Watchdog,
    global_pause_until: RwLock<Option<DateTime<Utc>>>,
    global_pause_hours: f64,
}

/// `TradingMode` is a plain 3-variant enum, not natively atomic; represented
/// as a single `AtomicBool` pair would be ambiguous for three states, so a
/// `u8`-backed atomic is used instead of taking a lock on every read.
struct AtomicTradingMode(std::sync::atomic::AtomicU8);

impl AtomicTradingMode {
    fn new(mode: TradingMode) -> Self {
        Self(std::sync::atomic::AtomicU8::new(Self::encode(mode)))
    }

    fn encode(mode: TradingMode) -> u8 {
        match mode {
            TradingMode::Live => 0,
            TradingMode::Paused => 1,
            TradingMode::Killed => 2,
        }
    }

    fn decode(byte: u8) -> TradingMode {
        match byte {
            0 => TradingMode::Live,
            2 => TradingMode::Killed,
            _ => TradingMode::Paused,
        }
    }

    fn load(&self) -> TradingMode {
        Self::decode(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, mode: TradingMode) {
        self.0.store(Self::encode(mode), Ordering::SeqCst);
    }
}

impl RuntimeState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trading_mode: TradingMode,
        max_trades_per_day: u32,
        max_trades_per_symbol: u32,
        profit_target_min: f64,
        profit_target_max: f64,
        profit_pause_hours: f64,
        max_consecutive_failures: u32,
        max_latency_ms: f64,
        global_pause_hours: f64,
    ) -> Self {
        Self {
            trading_mode: AtomicTradingMode::new(trading_mode),
            daily_limits: DailyLimits::new(max_trades_per_day, max_trades_per_symbol),
            profit_target: ProfitTarget::new(profit_target_min, profit_target_max, profit_pause_hours),
            watchdog: Watchdog::new(max_consecutive_failures, max_latency_ms),
            global_pause_until: RwLock::new(None),
            global_pause_hours,
        }
    }

    pub fn trading_mode(&self) -> TradingMode {
        self.trading_mode.load()
    }

    pub fn set_trading_mode(&self, mode: TradingMode) {
        self.trading_mode.store(mode);
    }

    pub fn is_killed(&self) -> bool {
        self.trading_mode() == TradingMode::Killed
    }

    /// Engage a timed global pause of `global_pause_hours` from now, e.g.
    /// after the daily loss limit trips or a bracket leaves a critical
    /// failure behind. Extends an already-running pause rather than
    /// shortening it if called again before the deadline passes.
    pub fn engage_global_pause(&self) {
        let until = Utc::now() + chrono::Duration::seconds((self.global_pause_hours * 3600.0) as i64);
        let mut guard = self.global_pause_until.write();
        let should_extend = match *guard {
            Some(existing) => until > existing,
            None => true,
        };
        if should_extend {
            *guard = Some(until);
        }
        if self.trading_mode() == TradingMode::Live {
            self.set_trading_mode(TradingMode::Paused);
        }
    }

    /// `None` once the deadline has passed or no pause was ever engaged.
    pub fn global_pause_until(&self) -> Option<DateTime<Utc>> {
        *self.global_pause_until.read()
    }

    fn global_pause_active(&self) -> bool {
        self.global_pause_until().is_some_and(|until| Utc::now() < until)
    }

    /// `true` when new entries should be blocked for any reason this struct
    /// alone can determine (kill switch, explicit pause, a timed global
    /// pause still in effect, or an unhealthy watchdog). Profit-target
    /// pause is checked separately since it needs the current equity.
    pub fn is_globally_paused(&self) -> bool {
        matches!(self.trading_mode(), TradingMode::Killed | TradingMode::Paused)
            || self.watchdog.is_unhealthy()
            || self.global_pause_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RuntimeState {
        RuntimeState::new(TradingMode::Live, 30, 10, 2.0, 4.0, 6.0, 3, 5000.0, 6.0)
    }

    #[test]
    fn starts_in_configured_mode() {
        let s = state();
        assert_eq!(s.trading_mode(), TradingMode::Live);
        assert!(!s.is_globally_paused());
    }

    #[test]
    fn killed_mode_is_globally_paused() {
        let s = state();
        s.set_trading_mode(TradingMode::Killed);
        assert!(s.is_killed());
        assert!(s.is_globally_paused());
    }

    #[test]
    fn unhealthy_watchdog_globally_pauses_even_when_live() {
        let s = state();
        s.watchdog.record(std::time::Duration::from_millis(10), Some("e1".into()));
        s.watchdog.record(std::time::Duration::from_millis(10), Some("e2".into()));
        s.watchdog.record(std::time::Duration::from_millis(10), Some("e3".into()));
        assert!(s.is_globally_paused());
    }

    #[test]
    fn engaging_global_pause_sets_a_future_deadline_and_pauses_live_trading() {
        let s = state();
        s.engage_global_pause();
        assert_eq!(s.trading_mode(), TradingMode::Paused);
        assert!(s.is_globally_paused());
        assert!(s.global_pause_until().unwrap() > Utc::now());
    }

    #[test]
    fn re_engaging_global_pause_never_shortens_the_deadline() {
        let s = state();
        s.engage_global_pause();
        let first = s.global_pause_until().unwrap();
        s.engage_global_pause();
        let second = s.global_pause_until().unwrap();
        assert!(second >= first);
    }
}
