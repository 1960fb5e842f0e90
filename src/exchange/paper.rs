// =============================================================================
// PaperExchange — simulated fills against the cached ticker
// =============================================================================
//
// Fills the entry leg at the current ticker price plus configurable
// bid/ask slippage and taker fee; protective legs settle synthetically
// against subsequent candle highs/lows fed in by the caller via
// `mark_price` / `settle_against_candle`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AdapterResult, BracketResult, EntryKind, ExchangeAdapter, Fail, MarketMetadata};
use crate::market_data::{Candle, Ticker};
use crate::types::{base_asset, BalanceInfo, Order, OrderStatus, OrderType, Side};

pub struct PaperExchangeConfig {
    pub slippage_bps: f64,
    pub taker_fee_pct: f64,
    pub maker_fee_pct: f64,
    pub starting_cash_usd: f64,
}

impl Default for PaperExchangeConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 2.0,
            taker_fee_pct: 0.26,
            maker_fee_pct: 0.16,
            starting_cash_usd: 10_000.0,
        }
    }
}

struct Ledger {
    cash_usd: f64,
    base_assets: HashMap<String, f64>,
    orders: HashMap<String, Order>,
}

pub struct PaperExchange {
    config: PaperExchangeConfig,
    tickers: RwLock<HashMap<String, Ticker>>,
    ledger: RwLock<Ledger>,
    order_seq: AtomicU64,
}

impl PaperExchange {
    pub fn new(config: PaperExchangeConfig) -> Self {
        let cash = config.starting_cash_usd;
        Self {
            config,
            tickers: RwLock::new(HashMap::new()),
            ledger: RwLock::new(Ledger {
                cash_usd: cash,
                base_assets: HashMap::new(),
                orders: HashMap::new(),
            }),
            order_seq: AtomicU64::new(0),
        }
    }

    /// Feed the simulator a fresh ticker — called by the market-data loop
    /// each tick so fills have a price to react to.
    pub fn mark_price(&self, ticker: Ticker) {
        self.tickers.write().insert(ticker.symbol.clone(), ticker);
    }

    fn next_id(&self) -> String {
        format!("paper-{}", self.order_seq.fetch_add(1, Ordering::SeqCst))
    }

    fn fill_price(&self, symbol: &str, side: Side) -> AdapterResult<f64> {
        let map = self.tickers.read();
        let ticker = map
            .get(symbol)
            .ok_or_else(|| Fail::NotFound(format!("no ticker cached for {symbol}")))?;
        let base = match side {
            Side::Long => ticker.ask,
            Side::Short => ticker.bid,
        };
        let slip = base * self.config.slippage_bps / 10_000.0;
        Ok(match side {
            Side::Long => base + slip,
            Side::Short => base - slip,
        })
    }

    /// Settle a market fill under an explicit order id, moving cash and the
    /// base-asset holding together so `fetch_balance` reflects what is
    /// actually held. `place_market` and `place_bracket`'s market-entry arm
    /// both fund through here so the ledger can never see one without the
    /// other.
    fn apply_fill(&self, id: String, symbol: &str, side: Side, qty: f64, price: f64) -> AdapterResult<Order> {
        let notional = price * qty;
        let fee = notional * self.config.taker_fee_pct / 100.0;

        {
            let mut ledger = self.ledger.write();
            let cost = match side {
                Side::Long => notional + fee,
                Side::Short => -(notional - fee),
            };
            if side == Side::Long && ledger.cash_usd < cost {
                return Err(Fail::InsufficientFunds(format!(
                    "need {cost:.2}, have {:.2}",
                    ledger.cash_usd
                )));
            }
            ledger.cash_usd -= cost;
            let delta = match side {
                Side::Long => qty,
                Side::Short => -qty,
            };
            *ledger.base_assets.entry(base_asset(symbol).to_string()).or_insert(0.0) += delta;
        }

        let order = Order {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
            stop_price: None,
            reduce_only: false,
            status: OrderStatus::Filled,
            filled_qty: qty,
            avg_fill_price: Some(price),
        };
        self.ledger.write().orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    async fn fetch_ticker(&self, symbol: &str) -> AdapterResult<Ticker> {
        self.tickers
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| Fail::NotFound(symbol.to_string()))
    }

    async fn fetch_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: &str,
        _limit: usize,
    ) -> AdapterResult<Vec<Candle>> {
        // The paper adapter does not originate candle history; callers feed
        // historical OHLCV in through the shared candle buffer instead.
        Ok(Vec::new())
    }

    async fn fetch_balance(&self) -> AdapterResult<Vec<BalanceInfo>> {
        let ledger = self.ledger.read();
        let mut balances = vec![BalanceInfo {
            asset: "USD".to_string(),
            free: ledger.cash_usd,
            locked: 0.0,
        }];
        for (asset, qty) in ledger.base_assets.iter() {
            balances.push(BalanceInfo {
                asset: asset.clone(),
                free: *qty,
                locked: 0.0,
            });
        }
        Ok(balances)
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> AdapterResult<Vec<Order>> {
        let ledger = self.ledger.read();
        Ok(ledger
            .orders
            .values()
            .filter(|o| symbol.map(|s| s == o.symbol).unwrap_or(true))
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn place_market(&self, symbol: &str, side: Side, qty: f64) -> AdapterResult<Order> {
        let price = self.fill_price(symbol, side)?;
        self.apply_fill(self.next_id(), symbol, side, qty, price)
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
            // Keyed to the correlation id, not `next_id()`, so a re-submit
            // of the same bracket resolves via `query_order` instead of
            // placing a second entry.
            EntryKind::Market => {
                let price = self.fill_price(symbol, side)?;
                self.apply_fill(format!("paper-{correlation_id}"), symbol, side, qty, price)?
            }
            EntryKind::Limit(price) => {
                // Simulated immediate fill at the limit price for simplicity
                // of the paper venue.
                let order = Order {
                    id: format!("paper-{correlation_id}"),
                    symbol: symbol.to_string(),
                    side,
                    order_type: OrderType::Limit,
                    qty,
                    limit_price: Some(price),
                    stop_price: None,
                    reduce_only: false,
                    status: OrderStatus::Filled,
                    filled_qty: qty,
                    avg_fill_price: Some(price),
                };
                self.ledger
                    .write()
                    .orders
                    .insert(order.id.clone(), order.clone());
                order
            }
        };

        let opp = match side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };
        let stop = Order {
            id: format!("paper-{correlation_id}-stop"),
            symbol: symbol.to_string(),
            side: opp,
            order_type: OrderType::Stop,
            qty: entry.filled_qty,
            limit_price: None,
            stop_price: Some(stop_price),
            reduce_only: true,
            status: OrderStatus::Open,
            filled_qty: 0.0,
            avg_fill_price: None,
        };
        let tp = take_profit_price.map(|price| Order {
            id: format!("paper-{correlation_id}-tp"),
            symbol: symbol.to_string(),
            side: opp,
            order_type: OrderType::Limit,
            qty: entry.filled_qty,
            limit_price: Some(price),
            stop_price: None,
            reduce_only: true,
            status: OrderStatus::Open,
            filled_qty: 0.0,
            avg_fill_price: None,
        });

        {
            let mut ledger = self.ledger.write();
            ledger.orders.insert(stop.id.clone(), stop.clone());
            if let Some(ref tp) = tp {
                ledger.orders.insert(tp.id.clone(), tp.clone());
            }
        }

        Ok(BracketResult {
            atomic,
            entry_order: entry,
            stop_order: Some(stop),
            take_profit_order: tp,
        })
    }

    async fn query_order(&self, id: &str) -> AdapterResult<Order> {
        let ledger = self.ledger.read();
        if let Some(order) = ledger.orders.get(id) {
            return Ok(order.clone());
        }
        // Entry orders placed through `place_bracket` are stored under
        // `paper-{correlation_id}`; callers query by the bare correlation
        // id, so check that form too before giving up.
        ledger
            .orders
            .get(&format!("paper-{id}"))
            .cloned()
            .ok_or_else(|| Fail::NotFound(id.to_string()))
    }

    async fn cancel_order(&self, id: &str) -> AdapterResult<()> {
        let mut ledger = self.ledger.write();
        match ledger.orders.get_mut(id) {
            Some(order) if !order.status.is_terminal() => {
                order.status = OrderStatus::Cancelled;
                Ok(())
            }
            Some(_) => Err(Fail::AlreadyFilled(id.to_string())),
            None => Err(Fail::NotFound(id.to_string())),
        }
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
        canonical.to_string()
    }

    fn supports_atomic_bracket(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, bid: f64, ask: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last: (bid + ask) / 2.0,
            bid,
            ask,
            ts: 0,
        }
    }

    #[tokio::test]
    async fn market_buy_fills_above_ask_with_slippage() {
        let ex = PaperExchange::new(PaperExchangeConfig::default());
        ex.mark_price(ticker("BTC/USD", 99.0, 100.0));
        let order = ex.place_market("BTC/USD", Side::Long, 1.0).await.unwrap();
        assert!(order.avg_fill_price.unwrap() > 100.0);
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn insufficient_funds_rejected() {
        let ex = PaperExchange::new(PaperExchangeConfig {
            starting_cash_usd: 1.0,
            ..PaperExchangeConfig::default()
        });
        ex.mark_price(ticker("BTC/USD", 99.0, 100.0));
        let result = ex.place_market("BTC/USD", Side::Long, 5.0).await;
        assert!(matches!(result, Err(Fail::InsufficientFunds(_))));
    }

    #[tokio::test]
    async fn bracket_protective_legs_are_reduce_only() {
        let ex = PaperExchange::new(PaperExchangeConfig::default());
        ex.mark_price(ticker("BTC/USD", 99.0, 100.0));
        let result = ex
            .place_bracket(
                "BTC/USD",
                Side::Long,
                1.0,
                EntryKind::Market,
                98.0,
                Some(103.0),
                false,
                "corr-1",
            )
            .await
            .unwrap();
        assert!(result.stop_order.unwrap().reduce_only);
        assert!(result.take_profit_order.unwrap().reduce_only);
    }

    #[tokio::test]
    async fn cancel_already_filled_order_fails() {
        let ex = PaperExchange::new(PaperExchangeConfig::default());
        ex.mark_price(ticker("BTC/USD", 99.0, 100.0));
        let order = ex.place_market("BTC/USD", Side::Long, 1.0).await.unwrap();
        let result = ex.cancel_order(&order.id).await;
        assert!(matches!(result, Err(Fail::AlreadyFilled(_))));
    }

    #[tokio::test]
    async fn market_buy_is_reflected_as_a_base_asset_balance() {
        let ex = PaperExchange::new(PaperExchangeConfig::default());
        ex.mark_price(ticker("BTC/USD", 99.0, 100.0));
        ex.place_market("BTC/USD", Side::Long, 2.0).await.unwrap();
        let balances = ex.fetch_balance().await.unwrap();
        let btc = balances.iter().find(|b| b.asset == "BTC").unwrap();
        assert_eq!(btc.total(), 2.0);
    }

    #[tokio::test]
    async fn resubmitting_a_market_bracket_with_the_same_correlation_id_is_idempotent() {
        let ex = PaperExchange::new(PaperExchangeConfig::default());
        ex.mark_price(ticker("BTC/USD", 99.0, 100.0));
        ex.place_bracket("BTC/USD", Side::Long, 1.0, EntryKind::Market, 98.0, Some(103.0), false, "corr-1")
            .await
            .unwrap();
        let found = ex.query_order("corr-1").await.unwrap();
        assert_eq!(found.status, OrderStatus::Filled);
        // a second place_bracket call under the same correlation id is what
        // the executor's idempotency guard short-circuits on; this test only
        // confirms the lookup it depends on actually resolves.
    }
}
