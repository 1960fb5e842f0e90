// =============================================================================
// Strategy Orchestrator — routes (regime, HTF context) to a trade signal
// =============================================================================
//
// Pipeline: gather candles -> compute indicators -> detect regime -> route
// through the table below -> emit a `TradeSignal`. The routing table is the
// entire strategy; there is no weighted ensemble scoring here, by design —
// the regime detector and HTF gate already carry all the signal.
//
//   TREND_UP             skip if HTF dominant = down; else buy near SMA20
//                         with RSI below ceiling; stop = entry - 2*ATR,
//                         target = entry + 3*ATR
//   TREND_DOWN            skip if HTF dominant = up; hold otherwise unless
//                         shorts are enabled
//   RANGE                 skip if HTF dominant = down; buy in the lower
//                         Bollinger band with RSI below ceiling; stop just
//                         below the lower band, target at the middle band
//   BREAKOUT_EXPANSION     skip the upside break if HTF bearish, skip the
//                         downside break unless shorts are enabled; stop =
//                         entry - 2.5*ATR, target = entry + 4*ATR
//   NO_TRADE               always hold

use crate::config::{IndicatorConfig, RegimeThresholds};
use crate::decision::{Action, IndicatorSnapshot};
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::rsi::current_rsi;
use crate::regime::{BreakoutDirection, HtfContext, Regime, RegimeSnapshot, Trend};
use crate::types::Side;

#[derive(Debug, Clone)]
pub struct TradeSignal {
    pub action: Action,
    pub side: Option<Side>,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size_multiplier: f64,
    pub reason: String,
}

impl TradeSignal {
    fn hold(entry_price: f64, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            side: None,
            confidence: 0.0,
            entry_price,
            stop_loss: 0.0,
            take_profit: 0.0,
            size_multiplier: 0.0,
            reason: reason.into(),
        }
    }

    fn skip(entry_price: f64, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Skip,
            side: None,
            confidence: 0.0,
            entry_price,
            stop_loss: 0.0,
            take_profit: 0.0,
            size_multiplier: 0.0,
            reason: reason.into(),
        }
    }
}

fn htf_dominant(htf: Option<&HtfContext>) -> Trend {
    htf.map(HtfContext::dominant).unwrap_or(Trend::Neutral)
}

pub fn evaluate(
    regime: &RegimeSnapshot,
    htf: Option<&HtfContext>,
    closes: &[f64],
    indicators: &IndicatorConfig,
    thresholds: &RegimeThresholds,
    enable_shorts: bool,
) -> TradeSignal {
    let price = regime.price;
    let atr = regime.atr;
    let dominant = htf_dominant(htf);

    match regime.regime {
        Regime::TrendUp => {
            if dominant == Trend::Down {
                return TradeSignal::skip(price, "HTF dominant trend is down, blocking long continuation");
            }
            let near_sma = ((price - regime.sma_fast) / regime.sma_fast).abs() * 100.0
                <= thresholds.trend_up_band_pct;
            let rsi_ok = current_rsi(closes, indicators.rsi_period)
                .map(|(rsi, _)| rsi < thresholds.trend_up_rsi_max)
                .unwrap_or(false);
            if near_sma && rsi_ok {
                TradeSignal {
                    action: Action::Buy,
                    side: Some(Side::Long),
                    confidence: (regime.adx / 50.0).min(1.0),
                    entry_price: price,
                    stop_loss: price - 2.0 * atr,
                    take_profit: price + 3.0 * atr,
                    size_multiplier: 1.0,
                    reason: "trend up continuation near SMA20 with RSI in range".to_string(),
                }
            } else {
                TradeSignal::hold(price, "trend up but price not near SMA20 or RSI too hot")
            }
        }

        Regime::TrendDown => {
            if dominant == Trend::Up {
                return TradeSignal::skip(price, "HTF dominant trend is up, blocking short continuation");
            }
            if !enable_shorts {
                return TradeSignal::hold(price, "trend down but shorts are disabled (spot-only)");
            }
            TradeSignal {
                action: Action::Sell,
                side: Some(Side::Short),
                confidence: (regime.adx / 50.0).min(1.0),
                entry_price: price,
                stop_loss: price + 2.0 * atr,
                take_profit: price - 3.0 * atr,
                size_multiplier: 1.0,
                reason: "trend down continuation".to_string(),
            }
        }

        Regime::Range => {
            if dominant == Trend::Down {
                return TradeSignal::skip(price, "HTF dominant trend is down, blocking range long");
            }
            let Some(bands) = calculate_bollinger(closes, indicators.bb_period, indicators.bb_std_dev) else {
                return TradeSignal::hold(price, "insufficient data for Bollinger bands");
            };
            let width = bands.upper - bands.lower;
            let lower_cutoff = bands.lower + width * thresholds.range_lower_percentile;
            let rsi_ok = current_rsi(closes, indicators.rsi_period)
                .map(|(rsi, _)| rsi < thresholds.rsi_range_max)
                .unwrap_or(false);
            if price <= lower_cutoff && rsi_ok {
                TradeSignal {
                    action: Action::Buy,
                    side: Some(Side::Long),
                    confidence: 0.6,
                    entry_price: price,
                    stop_loss: bands.lower - atr * 0.1,
                    take_profit: bands.middle,
                    size_multiplier: 0.75,
                    reason: "range buy near lower Bollinger band".to_string(),
                }
            } else {
                TradeSignal::hold(price, "range regime but price not in lower band zone")
            }
        }

        Regime::BreakoutExpansion => match regime.breakout_direction {
            Some(BreakoutDirection::Up) => {
                if dominant == Trend::Down {
                    TradeSignal::skip(price, "HTF bearish, blocking upside breakout")
                } else {
                    TradeSignal {
                        action: Action::Buy,
                        side: Some(Side::Long),
                        confidence: 0.75,
                        entry_price: price,
                        stop_loss: price - 2.5 * atr,
                        take_profit: price + 4.0 * atr,
                        size_multiplier: 1.0,
                        reason: "upside breakout with volume confirmation".to_string(),
                    }
                }
            }
            Some(BreakoutDirection::Down) => {
                if !enable_shorts {
                    TradeSignal::skip(price, "downside breakout but shorts are disabled (spot-only)")
                } else {
                    TradeSignal {
                        action: Action::Sell,
                        side: Some(Side::Short),
                        confidence: 0.75,
                        entry_price: price,
                        stop_loss: price + 2.5 * atr,
                        take_profit: price - 4.0 * atr,
                        size_multiplier: 1.0,
                        reason: "downside breakout with volume confirmation".to_string(),
                    }
                }
            }
            None => TradeSignal::hold(price, "breakout regime with no resolved direction"),
        },

        Regime::NoTrade => TradeSignal::hold(price, regime.reason.clone()),
    }
}

pub fn to_indicator_snapshot(regime: &RegimeSnapshot) -> IndicatorSnapshot {
    IndicatorSnapshot {
        price: regime.price,
        atr: regime.atr,
        adx: regime.adx,
        sma_fast: regime.sma_fast,
        sma_slow: regime.sma_slow,
        bb_width_pct: regime.bb_width_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> RegimeThresholds {
        RegimeThresholds::default()
    }

    fn indicators() -> IndicatorConfig {
        IndicatorConfig::default()
    }

    fn uptrend_closes() -> Vec<f64> {
        (0..60).map(|i| 100.0 + i as f64 * 0.2).collect()
    }

    fn snapshot(regime: Regime, price: f64, sma_fast: f64, adx: f64) -> RegimeSnapshot {
        RegimeSnapshot {
            regime,
            reason: "test".to_string(),
            breakout_direction: None,
            price,
            atr: 1.0,
            atr_pct: 1.0,
            adx,
            sma_fast,
            sma_slow: sma_fast - 2.0,
            bb_width_pct: 1.0,
            volume: 100.0,
        }
    }

    fn aligned_htf_up() -> HtfContext {
        HtfContext {
            trend_15m: Trend::Up,
            trend_1h: Trend::Up,
            sma20_15m: 100.0,
            sma50_15m: 95.0,
            sma20_1h: 100.0,
            sma50_1h: 95.0,
        }
    }

    fn aligned_htf_down() -> HtfContext {
        HtfContext {
            trend_15m: Trend::Down,
            trend_1h: Trend::Down,
            sma20_15m: 100.0,
            sma50_15m: 105.0,
            sma20_1h: 100.0,
            sma50_1h: 105.0,
        }
    }

    #[test]
    fn trend_up_buys_near_sma_with_good_rsi() {
        let closes = uptrend_closes();
        let price = *closes.last().unwrap();
        let snap = snapshot(Regime::TrendUp, price, price * 0.999, 30.0);
        let htf = aligned_htf_up();
        let signal = evaluate(&snap, Some(&htf), &closes, &indicators(), &thresholds(), false);
        assert_eq!(signal.action, Action::Buy);
        assert_eq!(signal.stop_loss, price - 2.0);
        assert_eq!(signal.take_profit, price + 3.0);
    }

    #[test]
    fn trend_up_skipped_when_htf_bearish() {
        let closes = uptrend_closes();
        let price = *closes.last().unwrap();
        let snap = snapshot(Regime::TrendUp, price, price * 0.999, 30.0);
        let htf = aligned_htf_down();
        let signal = evaluate(&snap, Some(&htf), &closes, &indicators(), &thresholds(), false);
        assert_eq!(signal.action, Action::Skip);
    }

    #[test]
    fn trend_down_holds_when_shorts_disabled() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 - i as f64 * 0.2).collect();
        let price = *closes.last().unwrap();
        let snap = snapshot(Regime::TrendDown, price, price * 1.001, 30.0);
        let signal = evaluate(&snap, None, &closes, &indicators(), &thresholds(), false);
        assert_eq!(signal.action, Action::Hold);
    }

    #[test]
    fn no_trade_always_holds() {
        let closes = uptrend_closes();
        let price = *closes.last().unwrap();
        let snap = snapshot(Regime::NoTrade, price, price, 5.0);
        let signal = evaluate(&snap, None, &closes, &indicators(), &thresholds(), false);
        assert_eq!(signal.action, Action::Hold);
    }

    #[test]
    fn breakout_down_skipped_without_shorts() {
        let closes = uptrend_closes();
        let price = *closes.last().unwrap();
        let mut snap = snapshot(Regime::BreakoutExpansion, price, price, 30.0);
        snap.breakout_direction = Some(BreakoutDirection::Down);
        let signal = evaluate(&snap, None, &closes, &indicators(), &thresholds(), false);
        assert_eq!(signal.action, Action::Skip);
    }
}
