// =============================================================================
// Risk Module
// =============================================================================
//
// Everything that can block or size a trade: per-symbol cooldowns, daily
// trade limits shared across paper and live, the randomized daily profit
// target, exchange health tracking, active-risk aggregation, and the
// ordered gate that ties them all together for a candidate trade.

pub mod cooldown;
pub mod daily_limits;
pub mod engine;
pub mod gate;
pub mod profit_target;
pub mod watchdog;

pub use cooldown::Cooldowns;
pub use daily_limits::{DailyLimits, DailyLimitsSnapshot};
pub use engine::{active_risk, mark_to_market_equity, position_risk_usd, reward_to_risk, ActiveRisk};
pub use gate::{evaluate as evaluate_gate, GateContext};
pub use profit_target::{ProfitTarget, ProfitTargetSnapshot};
pub use watchdog::{HealthCheck, Watchdog};
