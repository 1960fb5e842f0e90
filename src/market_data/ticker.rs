// Ticker cache — last-quote snapshot per symbol, read-mostly with a TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub ts: i64,
}

impl Ticker {
    pub fn is_valid(&self) -> bool {
        self.bid <= self.ask && self.last > 0.0
    }

    pub fn spread_bps(&self) -> f64 {
        if self.bid <= 0.0 {
            return f64::INFINITY;
        }
        (self.ask - self.bid) / self.bid * 10_000.0
    }
}

pub struct TickerCache {
    entries: RwLock<HashMap<String, (Ticker, Instant)>>,
    ttl: Duration,
}

impl TickerCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn put(&self, ticker: Ticker) {
        self.entries
            .write()
            .insert(ticker.symbol.clone(), (ticker, Instant::now()));
    }

    pub fn get(&self, symbol: &str) -> Option<Ticker> {
        let map = self.entries.read();
        match map.get(symbol) {
            Some((t, at)) if at.elapsed() <= self.ttl => Some(t.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(symbol: &str, bid: f64, ask: f64) -> Ticker {
        Ticker {
            symbol: symbol.into(),
            last: (bid + ask) / 2.0,
            bid,
            ask,
            ts: 0,
        }
    }

    #[test]
    fn validity_requires_bid_le_ask_and_positive_last() {
        assert!(mk("BTC/USD", 99.0, 101.0).is_valid());
        assert!(!mk("BTC/USD", 101.0, 99.0).is_valid());
    }

    #[test]
    fn cache_expires_after_ttl() {
        let cache = TickerCache::new(Duration::from_millis(1));
        cache.put(mk("BTC/USD", 99.0, 101.0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("BTC/USD").is_none());
    }

    #[test]
    fn spread_bps_computed_from_bid() {
        let t = mk("BTC/USD", 100.0, 100.1);
        assert!((t.spread_bps() - 10.0).abs() < 1e-6);
    }
}
