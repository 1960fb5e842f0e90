// =============================================================================
// Daily profit target — randomized target, pause once crossed
// =============================================================================
//
// Each trading day draws a fresh target percentage uniformly from
// [profit_target_min, profit_target_max] so the bot cannot be reverse
// engineered from a fixed daily stop. Once realized+unrealized profit for
// the day crosses that target, trading pauses for `profit_pause_hours`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitTargetSnapshot {
    pub date: String,
    pub target_pct: f64,
    pub starting_equity: f64,
    pub profit_today_pct: f64,
    pub paused: bool,
    pub pause_until: Option<DateTime<Utc>>,
}

struct Inner {
    date: String,
    target_pct: f64,
    starting_equity: f64,
    profit_today_pct: f64,
    pause_until: Option<DateTime<Utc>>,
}

pub struct ProfitTarget {
    inner: RwLock<Option<Inner>>,
    target_min: f64,
    target_max: f64,
    pause_hours: f64,
}

impl ProfitTarget {
    pub fn new(target_min: f64, target_max: f64, pause_hours: f64) -> Self {
        Self {
            inner: RwLock::new(None),
            target_min,
            target_max,
            pause_hours,
        }
    }

    fn ensure_day(&self, inner_guard: &mut Option<Inner>, equity: f64) {
        let today = Utc::now().date_naive().to_string();
        let needs_init = match inner_guard.as_ref() {
            None => true,
            Some(inner) => inner.date != today,
        };
        if needs_init {
            let target_pct = rand::thread_rng().gen_range(self.target_min..=self.target_max);
            info!(date = %today, target_pct, starting_equity = equity, "profit target initialized for new day");
            *inner_guard = Some(Inner {
                date: today,
                target_pct,
                starting_equity: equity,
                profit_today_pct: 0.0,
                pause_until: None,
            });
        }
    }

    /// Recompute today's profit percentage from current mark-to-market
    /// equity, and set `pause_until` the first time the target is crossed.
    pub fn update_equity(&self, equity: f64) {
        let mut guard = self.inner.write();
        self.ensure_day(&mut guard, equity);
        let inner = guard.as_mut().expect("ensure_day always populates");

        if inner.starting_equity <= 0.0 {
            return;
        }
        inner.profit_today_pct =
            (equity - inner.starting_equity) / inner.starting_equity * 100.0;

        if inner.profit_today_pct >= inner.target_pct && inner.pause_until.is_none() {
            let until = Utc::now() + chrono::Duration::seconds((self.pause_hours * 3600.0) as i64);
            warn!(
                profit_today_pct = inner.profit_today_pct,
                target_pct = inner.target_pct,
                pause_until = %until,
                "daily profit target reached, pausing new entries"
            );
            inner.pause_until = Some(until);
        }
    }

    /// `true` when trading is currently paused for having crossed today's target.
    pub fn is_paused(&self, equity: f64) -> bool {
        let mut guard = self.inner.write();
        self.ensure_day(&mut guard, equity);
        let inner = guard.as_ref().expect("ensure_day always populates");
        match inner.pause_until {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }

    pub fn snapshot(&self, equity: f64) -> ProfitTargetSnapshot {
        let mut guard = self.inner.write();
        self.ensure_day(&mut guard, equity);
        let inner = guard.as_ref().expect("ensure_day always populates");
        ProfitTargetSnapshot {
            date: inner.date.clone(),
            target_pct: inner.target_pct,
            starting_equity: inner.starting_equity,
            profit_today_pct: inner.profit_today_pct,
            paused: inner.pause_until.is_some_and(|until| Utc::now() < until),
            pause_until: inner.pause_until,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_draws_target_within_configured_range() {
        let pt = ProfitTarget::new(2.0, 4.0, 6.0);
        let snap = pt.snapshot(10_000.0);
        assert!(snap.target_pct >= 2.0 && snap.target_pct <= 4.0);
        assert_eq!(snap.starting_equity, 10_000.0);
        assert!(!snap.paused);
    }

    #[test]
    fn crossing_target_triggers_pause() {
        let pt = ProfitTarget::new(1.0, 1.0, 6.0);
        pt.update_equity(10_000.0);
        assert!(!pt.is_paused(10_000.0));
        pt.update_equity(10_200.0); // +2% vs 1% target
        assert!(pt.is_paused(10_200.0));
    }

    #[test]
    fn pause_does_not_retrigger_once_set() {
        let pt = ProfitTarget::new(1.0, 1.0, 6.0);
        pt.update_equity(10_000.0);
        pt.update_equity(10_200.0);
        let first = pt.snapshot(10_200.0).pause_until;
        pt.update_equity(10_300.0);
        let second = pt.snapshot(10_300.0).pause_until;
        assert_eq!(first, second);
    }
}
