// =============================================================================
// Risk Gate — ordered checks a candidate trade must clear before execution
// =============================================================================
//
// Every gate must pass. The first gate to fail short-circuits the rest and
// its reason is what gets written into the Decision record, so a blocked
// trade always has exactly one attributable cause.
//
// Order (spec §4.7):
//   1. global pause / kill switch
//   2. symbol cooldown
//   3. daily trade limits
//   4. shorts / margin policy
//   5. aggregate active risk vs equity
//   6. reward:risk ratio
//   7. fee-edge gate (optional, feature-flagged)
//   8. regime filter (optional, feature-flagged)
//   9. profit-target pause

use crate::position::Position;
use crate::risk::cooldown::Cooldowns;
use crate::risk::daily_limits::DailyLimits;
use crate::risk::engine::{active_risk, reward_to_risk};
use crate::risk::profit_target::ProfitTarget;
use crate::types::Side;

/// Everything the gate needs to evaluate one candidate trade, gathered by
/// the caller so this module stays free of any direct coupling to shared
/// application state.
pub struct GateContext<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub entry_price: f64,
    pub stop: f64,
    pub target: f64,
    pub equity: f64,
    pub open_positions: &'a [Position],
    /// Risk in USD the candidate trade itself would add, `|entry - stop| *
    /// qty`, not yet booked as an open `Position`.
    pub candidate_risk_usd: f64,
    pub global_paused: bool,
    pub enable_shorts: bool,
    pub margin_eligible: bool,
    pub max_active_risk_pct: f64,
    pub min_risk_reward_ratio: f64,
    pub fee_gate_enabled: bool,
    pub min_fee_edge_multiplier: f64,
    pub round_trip_fee_pct: f64,
    pub regime_filter_enabled: bool,
    pub regime_allows_entry: bool,
}

pub fn evaluate(
    ctx: &GateContext,
    daily_limits: &DailyLimits,
    cooldowns: &Cooldowns,
    profit_target: &ProfitTarget,
) -> Result<(), String> {
    // 1. global pause / kill switch
    if ctx.global_paused {
        return Err("trading is globally paused".to_string());
    }

    // 2. symbol cooldown
    if cooldowns.is_active(ctx.symbol) {
        return Err(format!("{} is within its post-close cooldown window", ctx.symbol));
    }

    // 3. daily trade limits
    if let Err(reason) = daily_limits.can_open(ctx.symbol) {
        return Err(reason);
    }

    // 4. shorts / margin policy
    if ctx.side == Side::Short && !ctx.enable_shorts {
        return Err("shorts are disabled".to_string());
    }
    if ctx.side == Side::Short && !ctx.margin_eligible {
        return Err("account is not margin-eligible, cannot short".to_string());
    }

    // 5. aggregate active risk vs equity
    let risk = active_risk(ctx.open_positions, ctx.candidate_risk_usd, ctx.equity, ctx.max_active_risk_pct);
    if !risk.within_limits {
        return Err(format!(
            "active risk {:.2} exceeds cap {:.2} ({:.2}% of equity)",
            risk.total_risk_usd, risk.max_allowed_risk_usd, risk.risk_pct_of_equity
        ));
    }

    // 6. reward:risk ratio
    match reward_to_risk(ctx.entry_price, ctx.stop, ctx.target) {
        Some(rr) if rr >= ctx.min_risk_reward_ratio => {}
        Some(rr) => {
            return Err(format!(
                "reward:risk {rr:.2} below minimum {:.2}",
                ctx.min_risk_reward_ratio
            ))
        }
        None => return Err("stop distance is zero, reward:risk undefined".to_string()),
    }

    // 7. fee-edge gate (optional)
    if ctx.fee_gate_enabled {
        let reward_per_unit = (ctx.target - ctx.entry_price).abs();
        let fee_cost_per_unit = ctx.entry_price * (ctx.round_trip_fee_pct / 100.0);
        if reward_per_unit < fee_cost_per_unit * ctx.min_fee_edge_multiplier {
            return Err(format!(
                "expected reward {reward_per_unit:.4} does not clear {}x round-trip fee cost {fee_cost_per_unit:.4}",
                ctx.min_fee_edge_multiplier
            ));
        }
    }

    // 8. regime filter (optional)
    if ctx.regime_filter_enabled && !ctx.regime_allows_entry {
        return Err("current regime does not permit new entries".to_string());
    }

    // 9. profit-target pause
    if profit_target.is_paused(ctx.equity) {
        return Err("daily profit target reached, new entries paused".to_string());
    }

    Ok(())
}
