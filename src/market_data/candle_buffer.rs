// =============================================================================
// Candle buffer — per (symbol, timeframe) OHLCV cache with TTL
// =============================================================================
//
// Candles are produced by the exchange adapter and cached here so the regime
// detector and strategy orchestrator do not re-fetch on every indicator call
// within a single tick. The in-progress (not yet closed) candle is replaced
// in place; once closed it becomes a permanent ring entry.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single OHLCV bar. `open_ts` is epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timeframe: String,
    pub is_closed: bool,
}

impl Candle {
    /// True when the bar's invariants hold: high >= max(open,close) >=
    /// min(open,close) >= low, and volume >= 0.
    pub fn is_valid(&self) -> bool {
        let hi = self.open.max(self.close);
        let lo = self.open.min(self.close);
        self.high >= hi && hi >= lo && lo >= self.low && self.volume >= 0.0
    }
}

/// Composite key identifying a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: String,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

/// Thread-safe ring buffer holding the most recent candles per key, with a
/// TTL-checked freshness timestamp separate from the bar data itself.
pub struct CandleBuffer {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    updated_at: RwLock<HashMap<CandleKey, Instant>>,
    max_candles: usize,
    ttl: Duration,
}

impl CandleBuffer {
    /// `ttl` MUST be at least the duration of one bar for the shortest
    /// timeframe this buffer serves; the caller is responsible for that.
    pub fn new(max_candles: usize, ttl: Duration) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            updated_at: RwLock::new(HashMap::new()),
            max_candles,
            ttl,
        }
    }

    /// Insert or replace the latest candle for `key`.
    pub fn update(&self, key: CandleKey, candle: Candle) {
        {
            let mut map = self.buffers.write();
            let ring = map
                .entry(key.clone())
                .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

            if let Some(last) = ring.back() {
                if !last.is_closed && last.open_ts == candle.open_ts {
                    ring.pop_back();
                }
            }
            ring.push_back(candle);
            while ring.len() > self.max_candles {
                ring.pop_front();
            }
        }
        self.updated_at.write().insert(key, Instant::now());
    }

    /// Bulk-load closed candles (e.g. from a REST `fetch_ohlcv` call),
    /// replacing whatever is currently cached for `key`.
    pub fn load(&self, key: CandleKey, candles: Vec<Candle>) {
        let mut ring: VecDeque<Candle> = candles.into_iter().collect();
        while ring.len() > self.max_candles {
            ring.pop_front();
        }
        self.buffers.write().insert(key.clone(), ring);
        self.updated_at.write().insert(key, Instant::now());
    }

    /// Most recent `count` **closed** candles, oldest first.
    pub fn get_closed(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let closed: Vec<&Candle> = ring.iter().filter(|c| c.is_closed).collect();
                let start = closed.len().saturating_sub(count);
                closed[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn get_closes(&self, key: &CandleKey, count: usize) -> Vec<f64> {
        self.get_closed(key, count).iter().map(|c| c.close).collect()
    }

    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        let map = self.buffers.read();
        map.get(key)
            .and_then(|ring| ring.iter().rev().find(|c| c.is_closed).map(|c| c.close))
    }

    pub fn count(&self, key: &CandleKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }

    /// True if `key` has never been updated or the last update is older than
    /// the buffer's TTL.
    pub fn is_stale(&self, key: &CandleKey) -> bool {
        match self.updated_at.read().get(key) {
            Some(t) => t.elapsed() > self.ttl,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64, closed: bool) -> Candle {
        Candle {
            open_ts: ts,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            timeframe: "5m".into(),
            is_closed: closed,
        }
    }

    #[test]
    fn candle_validity() {
        assert!(candle(0, 100.0, true).is_valid());
        let mut bad = candle(0, 100.0, true);
        bad.high = 90.0;
        assert!(!bad.is_valid());
    }

    #[test]
    fn in_progress_candle_replaced_in_place() {
        let buf = CandleBuffer::new(10, Duration::from_secs(300));
        let key = CandleKey::new("BTC/USD", "5m");
        buf.update(key.clone(), candle(1000, 100.0, false));
        buf.update(key.clone(), candle(1000, 101.0, false));
        assert_eq!(buf.count(&key), 1);
        assert_eq!(buf.get_closed(&key, 5).len(), 0);
    }

    #[test]
    fn closed_candles_accumulate_and_trim() {
        let buf = CandleBuffer::new(3, Duration::from_secs(300));
        let key = CandleKey::new("BTC/USD", "5m");
        for i in 0..5 {
            buf.update(key.clone(), candle(i * 300_000, 100.0 + i as f64, true));
        }
        let closed = buf.get_closed(&key, 10);
        assert_eq!(closed.len(), 3);
        assert_eq!(closed[0].close, 102.0);
    }

    #[test]
    fn staleness_tracks_ttl() {
        let buf = CandleBuffer::new(10, Duration::from_millis(1));
        let key = CandleKey::new("BTC/USD", "5m");
        assert!(buf.is_stale(&key));
        buf.update(key.clone(), candle(0, 100.0, true));
        std::thread::sleep(Duration::from_millis(5));
        assert!(buf.is_stale(&key));
    }

    #[test]
    fn last_close_ignores_in_progress() {
        let buf = CandleBuffer::new(10, Duration::from_secs(300));
        let key = CandleKey::new("BTC/USD", "5m");
        buf.update(key.clone(), candle(0, 100.0, true));
        buf.update(key.clone(), candle(300_000, 105.0, false));
        assert_eq!(buf.last_close(&key), Some(100.0));
    }
}
