// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies the current market into exactly one regime using a strict,
// ordered set of rules. The first rule that matches wins; nothing below it
// is evaluated.
//
//   1. NO_TRADE             — ATR/price below min_volatility_pct, or ADX
//                              below min_adx, or volume below min_volume.
//   2. BREAKOUT_EXPANSION   — ATR spikes above the 20-bar average and price
//                              breaks the prior 20-bar high/low (current bar
//                              excluded from the range).
//   3. TREND_UP             — ADX above threshold, price > SMA20 > SMA50,
//                              and the higher timeframe is bullish.
//   4. TREND_DOWN           — symmetric to TREND_UP.
//   5. RANGE                — ADX at or below threshold and Bollinger width
//                              at or below max_range_width_pct.
//   6. NO_TRADE              — none of the above; "conflicting signals".

use serde::{Deserialize, Serialize};

use crate::config::{IndicatorConfig, MarketFilters, RegimeThresholds};
use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::calculate_atr;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::peaks::{rolling_high, rolling_low};
use crate::indicators::sma::current_sma;
use crate::market_data::Candle;
use crate::regime::htf::{HtfContext, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    NoTrade,
    BreakoutExpansion,
    TrendUp,
    TrendDown,
    Range,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTrade => write!(f, "NO_TRADE"),
            Self::BreakoutExpansion => write!(f, "BREAKOUT_EXPANSION"),
            Self::TrendUp => write!(f, "TREND_UP"),
            Self::TrendDown => write!(f, "TREND_DOWN"),
            Self::Range => write!(f, "RANGE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakoutDirection {
    Up,
    Down,
}

/// Snapshot of the classified regime plus the indicator values that drove
/// the decision, preserved for the `Decision` entity's indicator snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: Regime,
    pub reason: String,
    pub breakout_direction: Option<BreakoutDirection>,
    pub price: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub adx: f64,
    pub sma_fast: f64,
    pub sma_slow: f64,
    pub bb_width_pct: f64,
    pub volume: f64,
}

fn trailing_atr_values(candles: &[Candle], period: usize, count: usize) -> Vec<f64> {
    let n = candles.len();
    let mut values = Vec::new();
    let mut end = n;
    while end > period && values.len() < count {
        if let Some(atr) = calculate_atr(&candles[..end], period) {
            values.push(atr);
        }
        end -= 1;
    }
    values
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Classify the current regime from the closed candle history. `candles`
/// must be ordered oldest-first with the most recent closed bar last.
/// Returns `None` when there is not enough history to compute the core
/// indicator set (ATR, ADX, SMA50, Bollinger).
pub fn detect(
    candles: &[Candle],
    htf: Option<&HtfContext>,
    indicators: &IndicatorConfig,
    filters: &MarketFilters,
    thresholds: &RegimeThresholds,
) -> Option<RegimeSnapshot> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let price = *closes.last()?;
    let volume = candles.last()?.volume;

    let atr = calculate_atr(candles, indicators.atr_period)?;
    let atr_pct = if price.abs() > f64::EPSILON {
        atr / price * 100.0
    } else {
        0.0
    };
    let adx = calculate_adx(candles, indicators.adx_period)?;
    let sma_fast = current_sma(&closes, indicators.sma_fast)?;
    let sma_slow = current_sma(&closes, indicators.sma_slow)?;
    let bollinger = calculate_bollinger(&closes, indicators.bb_period, indicators.bb_std_dev);
    let bb_width_pct = bollinger.as_ref().map_or(0.0, |b| b.width);

    // --- 1. NO_TRADE: thin/flat/quiet market ---------------------------
    if atr_pct < filters.min_volatility_pct
        || adx < thresholds.min_adx
        || volume < filters.min_volume
    {
        return Some(RegimeSnapshot {
            regime: Regime::NoTrade,
            reason: "below min volatility/ADX/volume floor".to_string(),
            breakout_direction: None,
            price,
            atr,
            atr_pct,
            adx,
            sma_fast,
            sma_slow,
            bb_width_pct,
            volume,
        });
    }

    // --- 2. BREAKOUT_EXPANSION ------------------------------------------
    let avg_atr_20 = mean(&trailing_atr_values(candles, indicators.atr_period, 20));
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let prior_high = rolling_high(&highs, 20, 1);
    let prior_low = rolling_low(&lows, 20, 1);
    let avg_volume_20 = {
        let n = candles.len();
        let window_end = n.saturating_sub(1);
        let window_start = window_end.saturating_sub(20);
        mean(&candles[window_start..window_end]
            .iter()
            .map(|c| c.volume)
            .collect::<Vec<_>>())
    };

    if let Some(avg_atr) = avg_atr_20 {
        if atr > thresholds.atr_spike_multiplier * avg_atr {
            let margin = thresholds.breakout_margin_atr * atr;
            let volume_ok = avg_volume_20
                .map(|avg| volume > thresholds.volume_spike_multiplier * avg)
                .unwrap_or(true);

            if volume_ok {
                if let Some(high) = prior_high {
                    if price > high + margin {
                        return Some(RegimeSnapshot {
                            regime: Regime::BreakoutExpansion,
                            reason: "ATR spike with upside breakout of prior 20-bar high".to_string(),
                            breakout_direction: Some(BreakoutDirection::Up),
                            price,
                            atr,
                            atr_pct,
                            adx,
                            sma_fast,
                            sma_slow,
                            bb_width_pct,
                            volume,
                        });
                    }
                }
                if let Some(low) = prior_low {
                    if price < low - margin {
                        return Some(RegimeSnapshot {
                            regime: Regime::BreakoutExpansion,
                            reason: "ATR spike with downside breakout of prior 20-bar low".to_string(),
                            breakout_direction: Some(BreakoutDirection::Down),
                            price,
                            atr,
                            atr_pct,
                            adx,
                            sma_fast,
                            sma_slow,
                            bb_width_pct,
                            volume,
                        });
                    }
                }
            }
        }
    }

    let htf_bullish = htf.map_or(true, |h| h.dominant() == Trend::Up);
    let htf_bearish = htf.map_or(true, |h| h.dominant() != Trend::Up);

    // --- 3. TREND_UP ------------------------------------------------------
    if adx > thresholds.adx_threshold && price > sma_fast && sma_fast > sma_slow && htf_bullish {
        return Some(RegimeSnapshot {
            regime: Regime::TrendUp,
            reason: "ADX above threshold, SMA stack bullish, HTF aligned".to_string(),
            breakout_direction: None,
            price,
            atr,
            atr_pct,
            adx,
            sma_fast,
            sma_slow,
            bb_width_pct,
            volume,
        });
    }

    // --- 4. TREND_DOWN ------------------------------------------------------
    if adx > thresholds.adx_threshold && price < sma_fast && sma_fast < sma_slow && htf_bearish {
        return Some(RegimeSnapshot {
            regime: Regime::TrendDown,
            reason: "ADX above threshold, SMA stack bearish, HTF aligned".to_string(),
            breakout_direction: None,
            price,
            atr,
            atr_pct,
            adx,
            sma_fast,
            sma_slow,
            bb_width_pct,
            volume,
        });
    }

    // --- 5. RANGE ------------------------------------------------------
    if adx <= thresholds.adx_threshold && bb_width_pct <= thresholds.max_range_width_pct {
        if let Some(b) = &bollinger {
            if price >= b.lower && price <= b.upper {
                return Some(RegimeSnapshot {
                    regime: Regime::Range,
                    reason: "ADX subdued, Bollinger width contained, price within bands".to_string(),
                    breakout_direction: None,
                    price,
                    atr,
                    atr_pct,
                    adx,
                    sma_fast,
                    sma_slow,
                    bb_width_pct,
                    volume,
                });
            }
        }
    }

    // --- 6. Fallback --------------------------------------------------
    Some(RegimeSnapshot {
        regime: Regime::NoTrade,
        reason: "conflicting signals".to_string(),
        breakout_direction: None,
        price,
        atr,
        atr_pct,
        adx,
        sma_fast,
        sma_slow,
        bb_width_pct,
        volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_ts: ts,
            open,
            high,
            low,
            close,
            volume,
            timeframe: "5m".into(),
            is_closed: true,
        }
    }

    fn flat_series(n: usize, price: f64, volume: f64) -> Vec<Candle> {
        (0..n as i64)
            .map(|i| candle(i, price, price + 0.1, price - 0.1, price, volume))
            .collect()
    }

    #[test]
    fn quiet_market_is_no_trade() {
        let candles = flat_series(60, 100.0, 1.0);
        let snapshot = detect(
            &candles,
            None,
            &IndicatorConfig::default(),
            &MarketFilters::default(),
            &RegimeThresholds::default(),
        )
        .unwrap();
        assert_eq!(snapshot.regime, Regime::NoTrade);
    }

    #[test]
    fn insufficient_history_returns_none() {
        let candles = flat_series(5, 100.0, 100.0);
        let result = detect(
            &candles,
            None,
            &IndicatorConfig::default(),
            &MarketFilters::default(),
            &RegimeThresholds::default(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn steady_uptrend_classifies_trend_up_or_breakout() {
        let mut candles: Vec<Candle> = (0..70)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.4;
                candle(i, base, base + 0.6, base - 0.6, base + 0.3, 50.0)
            })
            .collect();
        let last = candles.last().unwrap().close;
        candles.push(candle(70, last, last + 2.0, last - 0.2, last + 1.5, 50.0));

        let snapshot = detect(
            &candles,
            None,
            &IndicatorConfig::default(),
            &MarketFilters {
                min_volatility_pct: 0.0,
                min_volume: 0.0,
                min_volume_percentile: 0.0,
            },
            &RegimeThresholds::default(),
        )
        .unwrap();
        assert!(matches!(
            snapshot.regime,
            Regime::TrendUp | Regime::BreakoutExpansion
        ));
    }

    #[test]
    fn trend_up_blocked_when_htf_dominant_is_down() {
        let mut candles: Vec<Candle> = (0..70)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.4;
                candle(i, base, base + 0.6, base - 0.6, base + 0.3, 50.0)
            })
            .collect();
        let last = candles.last().unwrap().close;
        candles.push(candle(70, last, last + 0.5, last - 0.2, last + 0.2, 50.0));

        let htf = HtfContext {
            trend_15m: Trend::Down,
            trend_1h: Trend::Down,
            sma20_15m: 0.0,
            sma50_15m: 0.0,
            sma20_1h: 0.0,
            sma50_1h: 0.0,
        };

        let snapshot = detect(
            &candles,
            Some(&htf),
            &IndicatorConfig::default(),
            &MarketFilters {
                min_volatility_pct: 0.0,
                min_volume: 0.0,
                min_volume_percentile: 0.0,
            },
            &RegimeThresholds::default(),
        )
        .unwrap();
        assert_ne!(snapshot.regime, Regime::TrendUp);
    }
}
