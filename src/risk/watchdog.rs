// =============================================================================
// API watchdog — tracks exchange health, never places or cancels orders itself
// =============================================================================
//
// Each tick the caller times a lightweight exchange call (a ticker or
// balance fetch) and reports the outcome here. Consecutive failures or
// latency above the configured ceiling count toward `max_consecutive_failures`;
// once that threshold is hit the watchdog reports unhealthy and the engine's
// risk gate is expected to block new entries until a check succeeds again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub timestamp: DateTime<Utc>,
    pub is_healthy: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
    pub consecutive_failures: u32,
}

struct Inner {
    consecutive_failures: u32,
    total_checks: u64,
    total_failures: u64,
    last_check: Option<HealthCheck>,
}

pub struct Watchdog {
    inner: RwLock<Inner>,
    max_consecutive_failures: u32,
    max_latency_ms: f64,
}

impl Watchdog {
    pub fn new(max_consecutive_failures: u32, max_latency_ms: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                consecutive_failures: 0,
                total_checks: 0,
                total_failures: 0,
                last_check: None,
            }),
            max_consecutive_failures,
            max_latency_ms,
        }
    }

    /// Record the outcome of a probe the caller already ran. `latency` is
    /// wall-clock time for the probed call; `error` is `Some` on a hard
    /// failure (network error, non-2xx, timeout).
    pub fn record(&self, latency: Duration, error: Option<String>) -> HealthCheck {
        let mut inner = self.inner.write();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let latency_exceeded = latency_ms > self.max_latency_ms;
        let is_healthy = error.is_none() && !latency_exceeded;

        inner.total_checks += 1;
        if is_healthy {
            inner.consecutive_failures = 0;
        } else {
            inner.consecutive_failures += 1;
            inner.total_failures += 1;
        }

        let effective_error = error.or_else(|| {
            latency_exceeded.then(|| {
                format!("latency {latency_ms:.1}ms exceeded ceiling {:.1}ms", self.max_latency_ms)
            })
        });

        let check = HealthCheck {
            timestamp: Utc::now(),
            is_healthy,
            latency_ms,
            error: effective_error,
            consecutive_failures: inner.consecutive_failures,
        };

        if !is_healthy {
            warn!(
                latency_ms,
                consecutive_failures = inner.consecutive_failures,
                error = ?check.error,
                "watchdog probe failed"
            );
        } else if inner.consecutive_failures == 0 && inner.total_failures > 0 {
            info!("watchdog probe recovered");
        }

        inner.last_check = Some(check.clone());
        check
    }

    /// `true` once consecutive failures reach the configured ceiling — the
    /// engine should treat this as a reason to block new entries, not to
    /// take any corrective action of its own.
    pub fn is_unhealthy(&self) -> bool {
        self.inner.read().consecutive_failures >= self.max_consecutive_failures
    }

    pub fn last_check(&self) -> Option<HealthCheck> {
        self.inner.read().last_check.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.read().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_probe_resets_consecutive_failures() {
        let wd = Watchdog::new(3, 5000.0);
        wd.record(Duration::from_millis(10), Some("boom".into()));
        wd.record(Duration::from_millis(10), Some("boom".into()));
        assert_eq!(wd.consecutive_failures(), 2);
        wd.record(Duration::from_millis(10), None);
        assert_eq!(wd.consecutive_failures(), 0);
    }

    #[test]
    fn latency_above_ceiling_counts_as_failure() {
        let wd = Watchdog::new(3, 100.0);
        let check = wd.record(Duration::from_millis(500), None);
        assert!(!check.is_healthy);
        assert!(check.error.is_some());
    }

    #[test]
    fn unhealthy_once_threshold_reached() {
        let wd = Watchdog::new(2, 5000.0);
        assert!(!wd.is_unhealthy());
        wd.record(Duration::from_millis(10), Some("e1".into()));
        assert!(!wd.is_unhealthy());
        wd.record(Duration::from_millis(10), Some("e2".into()));
        assert!(wd.is_unhealthy());
    }
}
