// =============================================================================
// Higher Time Frame (HTF) context
// =============================================================================
//
// Evaluates 15m and 1h SMA(20)/SMA(50) stacks to determine whether the
// higher time frames support a trade direction (spec §4.4).
//
// trend  = up   iff price > SMA20 > SMA50
//          down iff price < SMA20 < SMA50
//          neutral otherwise
// htf_aligned = both timeframes agree on a non-neutral trend

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::indicators::sma::current_sma;
use crate::market_data::candle_buffer::{CandleBuffer, CandleKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtfContext {
    pub trend_15m: Trend,
    pub trend_1h: Trend,
    pub sma20_15m: f64,
    pub sma50_15m: f64,
    pub sma20_1h: f64,
    pub sma50_1h: f64,
}

impl HtfContext {
    pub fn htf_aligned(&self) -> bool {
        self.trend_15m != Trend::Neutral && self.trend_15m == self.trend_1h
    }

    pub fn dominant(&self) -> Trend {
        if self.htf_aligned() {
            self.trend_15m
        } else {
            Trend::Neutral
        }
    }
}

fn classify(price: f64, sma20: f64, sma50: f64) -> Trend {
    if price > sma20 && sma20 > sma50 {
        Trend::Up
    } else if price < sma20 && sma20 < sma50 {
        Trend::Down
    } else {
        Trend::Neutral
    }
}

fn trend_for_timeframe(candle_buffer: &CandleBuffer, symbol: &str, timeframe: &str) -> Option<(Trend, f64, f64)> {
    let key = CandleKey::new(symbol, timeframe);
    let closes = candle_buffer.get_closes(&key, 60);
    if closes.len() < 50 {
        return None;
    }
    let price = *closes.last()?;
    let sma20 = current_sma(&closes, 20)?;
    let sma50 = current_sma(&closes, 50)?;
    Some((classify(price, sma20, sma50), sma20, sma50))
}

/// Compute the HTF context for `symbol` from the shared candle buffer.
/// Returns `None` when fewer than 50 closed candles are cached on either
/// the 15m or 1h timeframe.
pub fn compute(candle_buffer: &CandleBuffer, symbol: &str) -> Option<HtfContext> {
    let (trend_15m, sma20_15m, sma50_15m) = trend_for_timeframe(candle_buffer, symbol, "15m")?;
    let (trend_1h, sma20_1h, sma50_1h) = trend_for_timeframe(candle_buffer, symbol, "1h")?;
    Some(HtfContext {
        trend_15m,
        trend_1h,
        sma20_15m,
        sma50_15m,
        sma20_1h,
        sma50_1h,
    })
}

/// TTL cache for HTF contexts, keyed by symbol. The cache TTL is set to the
/// engine's tick period — the HTF never needs to be recomputed faster than
/// the loop drives new candles in (spec §4.4).
pub struct HtfCache {
    entries: RwLock<HashMap<String, (HtfContext, Instant)>>,
    ttl: Duration,
}

impl HtfCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get_or_compute(&self, candle_buffer: &CandleBuffer, symbol: &str) -> Option<HtfContext> {
        if let Some((ctx, at)) = self.entries.read().get(symbol) {
            if at.elapsed() <= self.ttl {
                return Some(ctx.clone());
            }
        }
        let ctx = compute(candle_buffer, symbol)?;
        self.entries
            .write()
            .insert(symbol.to_string(), (ctx.clone(), Instant::now()));
        Some(ctx)
    }
}
