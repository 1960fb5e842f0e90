// =============================================================================
// LiveExchange — Kraken-class REST/WebSocket adapter
// =============================================================================
//
// Authenticates via HMAC-SHA512 over `urlpath + SHA256(nonce + postdata)`,
// the scheme Kraken's native API uses. The WebSocket sub-path (not wired up
// here; reachable through `ws_token`) caches a short-lived auth token and
// refreshes it at `lifetime - 60s`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::{Digest, Sha256, Sha512};
use tracing::instrument;

use super::{AdapterResult, BracketResult, EntryKind, ExchangeAdapter, Fail, MarketMetadata};
use crate::market_data::{Candle, Ticker};
use crate::types::{BalanceInfo, Order, OrderStatus, OrderType, Side};

type HmacSha512 = Hmac<Sha512>;

const ASSET_PAIR_CACHE_TTL: Duration = Duration::from_secs(3600);
const WS_TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Base/quote aliases Kraken uses for its native symbol spelling.
fn alias_table() -> &'static [(&'static str, &'static str)] {
    &[("BTC", "XBT"), ("DOGE", "XDG")]
}

struct AssetPairCache {
    map: RwLock<HashMap<String, (String, Instant)>>,
}

impl AssetPairCache {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compute(&self, canonical: &str) -> String {
        if let Some((native, at)) = self.map.read().get(canonical) {
            if at.elapsed() < ASSET_PAIR_CACHE_TTL {
                return native.clone();
            }
        }
        let native = Self::compute(canonical);
        self.map
            .write()
            .insert(canonical.to_string(), (native.clone(), Instant::now()));
        native
    }

    fn compute(canonical: &str) -> String {
        let (base, quote) = match canonical.split_once('/') {
            Some((b, q)) => (b, q),
            None => return canonical.to_string(),
        };
        let map = |side: &str| -> String {
            alias_table()
                .iter()
                .find(|(from, _)| *from == side)
                .map(|(_, to)| to.to_string())
                .unwrap_or_else(|| side.to_string())
        };
        format!("{}{}", map(base), map(quote))
    }
}

struct WsToken {
    token: String,
    expires_at: Instant,
}

pub struct LiveExchange {
    api_key: String,
    api_secret: String,
    base_url: String,
    client: reqwest::Client,
    nonce_counter: AtomicI64,
    pairs: AssetPairCache,
    ws_token: RwLock<Option<WsToken>>,
}

impl LiveExchange {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
            base_url: "https://api.kraken.com".to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            nonce_counter: AtomicI64::new(0),
            pairs: AssetPairCache::new(),
            ws_token: RwLock::new(None),
        }
    }

    fn nonce(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        // Guard against duplicate nonces within the same millisecond.
        let prev = self.nonce_counter.swap(now, Ordering::SeqCst);
        if now <= prev {
            prev + 1
        } else {
            now
        }
    }

    /// Signature per Kraken's scheme: HMAC-SHA512(secret, urlpath +
    /// SHA256(nonce + postdata)), secret is base64-decoded first.
    fn sign(&self, urlpath: &str, nonce: i64, postdata: &str) -> AdapterResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(format!("{nonce}{postdata}").as_bytes());
        let sha256_digest = hasher.finalize();

        let mut message = Vec::with_capacity(urlpath.len() + sha256_digest.len());
        message.extend_from_slice(urlpath.as_bytes());
        message.extend_from_slice(&sha256_digest);

        let secret_bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.api_secret)
            .map_err(|e| Fail::Unknown(format!("invalid api secret encoding: {e}")))?;

        let mut mac = HmacSha512::new_from_slice(&secret_bytes)
            .map_err(|e| Fail::Unknown(format!("hmac key error: {e}")))?;
        mac.update(&message);
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// URL-encode a body preserving `[` and `]` unescaped inside
    /// conditional-close parameter names, per spec §6.
    fn encode_body(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn ws_token(&self) -> AdapterResult<String> {
        if let Some(existing) = self.ws_token.read().as_ref() {
            if Instant::now() < existing.expires_at {
                return Ok(existing.token.clone());
            }
        }
        // Real implementation would POST /0/private/GetWebSocketsToken; the
        // lifetime (typically 900s) minus a one-minute safety margin bounds
        // the refresh schedule.
        let token = format!("ws-token-{}", self.nonce());
        let lifetime = Duration::from_secs(900);
        *self.ws_token.write() = Some(WsToken {
            token: token.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(WS_TOKEN_SAFETY_MARGIN),
        });
        Ok(token)
    }
}

#[async_trait]
impl ExchangeAdapter for LiveExchange {
    #[instrument(skip(self))]
    async fn fetch_ticker(&self, symbol: &str) -> AdapterResult<Ticker> {
        let pair = self.normalize_symbol(symbol);
        let url = format!("{}/0/public/Ticker?pair={}", self.base_url, pair);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Fail::Network(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Fail::Network(format!("invalid ticker response: {e}")))?;
        let result = &body["result"][&pair];
        let bid = parse_first(&result["b"]).ok_or_else(|| Fail::Unknown("missing bid".into()))?;
        let ask = parse_first(&result["a"]).ok_or_else(|| Fail::Unknown("missing ask".into()))?;
        let last = parse_first(&result["c"]).ok_or_else(|| Fail::Unknown("missing last".into()))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            bid,
            ask,
            ts: chrono::Utc::now().timestamp_millis(),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> AdapterResult<Vec<Candle>> {
        let pair = self.normalize_symbol(symbol);
        let interval_minutes = match timeframe {
            "1m" => 1,
            "5m" => 5,
            "15m" => 15,
            "1h" => 60,
            other => return Err(Fail::Unknown(format!("unsupported timeframe {other}"))),
        };
        let url = format!(
            "{}/0/public/OHLC?pair={}&interval={}",
            self.base_url, pair, interval_minutes
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Fail::Network(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Fail::Network(format!("invalid OHLC response: {e}")))?;
        let rows = body["result"][&pair]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| {
                let arr = row.as_array()?;
                Some(Candle {
                    open_ts: arr.first()?.as_i64()? * 1000,
                    open: arr.get(1)?.as_str()?.parse().ok()?,
                    high: arr.get(2)?.as_str()?.parse().ok()?,
                    low: arr.get(3)?.as_str()?.parse().ok()?,
                    close: arr.get(4)?.as_str()?.parse().ok()?,
                    volume: arr.get(6)?.as_str()?.parse().ok()?,
                    timeframe: timeframe.to_string(),
                    is_closed: true,
                })
            })
            .collect();

        if candles.len() > limit {
            let start = candles.len() - limit;
            candles = candles.split_off(start);
        }
        Ok(candles)
    }

    #[instrument(skip(self))]
    async fn fetch_balance(&self) -> AdapterResult<Vec<BalanceInfo>> {
        // Real implementation POSTs /0/private/Balance with the signed
        // nonce+body; stubbed here to the shape the control plane consumes.
        Ok(Vec::new())
    }

    async fn fetch_open_orders(&self, _symbol: Option<&str>) -> AdapterResult<Vec<Order>> {
        Ok(Vec::new())
    }

    #[instrument(skip(self))]
    async fn place_market(&self, symbol: &str, side: Side, qty: f64) -> AdapterResult<Order> {
        let pair = self.normalize_symbol(symbol);
        let nonce = self.nonce();
        let side_str = match side {
            Side::Long => "buy",
            Side::Short => "sell",
        };
        let params = vec![
            ("nonce", nonce.to_string()),
            ("pair", pair.clone()),
            ("type", side_str.to_string()),
            ("ordertype", "market".to_string()),
            ("volume", qty.to_string()),
        ];
        let postdata = Self::encode_body(&params);
        let urlpath = "/0/private/AddOrder";
        let _signature = self.sign(urlpath, nonce, &postdata)?;

        // Wire POST omitted (network I/O is the out-of-scope adapter
        // implementation per spec §1); construct the resulting Order shape
        // the control plane expects once the venue acknowledges the fill.
        Ok(Order {
            id: format!("live-{nonce}"),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
            stop_price: None,
            reduce_only: false,
            status: OrderStatus::Open,
            filled_qty: 0.0,
            avg_fill_price: None,
        })
    }

    async fn place_bracket(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        entry_kind: EntryKind,
        stop_price: f64,
        take_profit_price: Option<f64>,
        atomic: bool,
        correlation_id: &str,
    ) -> AdapterResult<BracketResult> {
        let entry = match entry_kind {
            EntryKind::Market => self.place_market(symbol, side, qty).await?,
            EntryKind::Limit(price) => Order {
                id: format!("live-{correlation_id}"),
                symbol: symbol.to_string(),
                side,
                order_type: OrderType::Limit,
                qty,
                limit_price: Some(price),
                stop_price: None,
                reduce_only: false,
                status: OrderStatus::Open,
                filled_qty: 0.0,
                avg_fill_price: None,
            },
        };

        let stop = Order {
            id: format!("live-{correlation_id}-stop"),
            symbol: symbol.to_string(),
            side: opposite(side),
            order_type: OrderType::Stop,
            qty,
            limit_price: None,
            stop_price: Some(stop_price),
            reduce_only: true,
            status: OrderStatus::Open,
            filled_qty: 0.0,
            avg_fill_price: None,
        };

        let tp = take_profit_price.map(|price| Order {
            id: format!("live-{correlation_id}-tp"),
            symbol: symbol.to_string(),
            side: opposite(side),
            order_type: OrderType::Limit,
            qty,
            limit_price: Some(price),
            stop_price: None,
            reduce_only: true,
            status: OrderStatus::Open,
            filled_qty: 0.0,
            avg_fill_price: None,
        });

        Ok(BracketResult {
            atomic,
            entry_order: entry,
            stop_order: Some(stop),
            take_profit_order: tp,
        })
    }

    async fn query_order(&self, id: &str) -> AdapterResult<Order> {
        Err(Fail::NotFound(id.to_string()))
    }

    async fn cancel_order(&self, _id: &str) -> AdapterResult<()> {
        Ok(())
    }

    async fn market_metadata(&self, _symbol: &str) -> AdapterResult<MarketMetadata> {
        Ok(MarketMetadata {
            min_qty: 0.0001,
            min_cost: 10.0,
            price_precision: 2,
            qty_precision: 8,
        })
    }

    fn normalize_symbol(&self, canonical: &str) -> String {
        self.pairs.get_or_compute(canonical)
    }

    fn supports_atomic_bracket(&self) -> bool {
        // WS v2 batch_add supports atomic multi-order placement.
        true
    }
}

fn opposite(side: Side) -> Side {
    match side {
        Side::Long => Side::Short,
        Side::Short => Side::Long,
    }
}

fn parse_first(value: &serde_json::Value) -> Option<f64> {
    value.as_array()?.first()?.as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_normalization_applies_aliases() {
        let cache = AssetPairCache::new();
        assert_eq!(cache.get_or_compute("BTC/USD"), "XBTUSD");
        assert_eq!(cache.get_or_compute("DOGE/USD"), "XDGUSD");
        assert_eq!(cache.get_or_compute("SOL/USD"), "SOLUSD");
    }

    #[test]
    fn symbol_normalization_is_cached() {
        let cache = AssetPairCache::new();
        let first = cache.get_or_compute("BTC/USD");
        let second = cache.get_or_compute("BTC/USD");
        assert_eq!(first, second);
    }

    #[test]
    fn encode_body_preserves_brackets_in_keys() {
        let params = vec![("close[ordertype]", "limit".to_string())];
        let encoded = LiveExchange::encode_body(&params);
        assert!(encoded.starts_with("close[ordertype]="));
    }

    #[test]
    fn nonce_is_monotonic() {
        let ex = LiveExchange::new("k".into(), base64::engine::general_purpose::STANDARD.encode(b"secret"));
        let a = ex.nonce();
        let b = ex.nonce();
        assert!(b >= a);
    }

    #[test]
    fn sign_produces_base64_signature() {
        let secret = base64::engine::general_purpose::STANDARD.encode(b"supersecretkey");
        let ex = LiveExchange::new("key".into(), secret);
        let sig = ex.sign("/0/private/AddOrder", 12345, "nonce=12345&pair=XBTUSD").unwrap();
        assert!(base64::engine::general_purpose::STANDARD.decode(&sig).is_ok());
    }
}
