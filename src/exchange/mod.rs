// =============================================================================
// Exchange adapter contract (spec §4.1)
// =============================================================================
//
// `ExchangeAdapter` is the polymorphic boundary between the control plane and
// a concrete venue. `LiveExchange` and `PaperExchange` are its two variants;
// the control plane never matches on which one it holds.

pub mod live;
pub mod paper;

use async_trait::async_trait;

use crate::types::{BalanceInfo, Order, Side};

#[derive(Debug, Clone, PartialEq)]
pub enum Fail {
    Network(String),
    Rate(String),
    NotFound(String),
    InsufficientFunds(String),
    InvalidSize(String),
    Rejected(String),
    AlreadyFilled(String),
    Unknown(String),
}

impl std::fmt::Display for Fail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(m) => write!(f, "network: {m}"),
            Self::Rate(m) => write!(f, "rate limited: {m}"),
            Self::NotFound(m) => write!(f, "not found: {m}"),
            Self::InsufficientFunds(m) => write!(f, "insufficient funds: {m}"),
            Self::InvalidSize(m) => write!(f, "invalid size: {m}"),
            Self::Rejected(m) => write!(f, "rejected: {m}"),
            Self::AlreadyFilled(m) => write!(f, "already filled: {m}"),
            Self::Unknown(m) => write!(f, "unknown: {m}"),
        }
    }
}

impl std::error::Error for Fail {}

pub type AdapterResult<T> = Result<T, Fail>;

#[derive(Debug, Clone)]
pub struct MarketMetadata {
    pub min_qty: f64,
    pub min_cost: f64,
    pub price_precision: u32,
    pub qty_precision: u32,
}

/// Placement kind for the entry leg of a bracket.
#[derive(Debug, Clone, Copy)]
pub enum EntryKind {
    Market,
    Limit(f64),
}

/// Outcome of a `place_bracket` call at the adapter layer. This is a thinner
/// shape than the executor's `Outcome` (§4.6) — the adapter only reports what
/// actually happened on the wire; the executor's state machine interprets it.
#[derive(Debug, Clone)]
pub struct BracketResult {
    pub atomic: bool,
    pub entry_order: Order,
    pub stop_order: Option<Order>,
    pub take_profit_order: Option<Order>,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn fetch_ticker(&self, symbol: &str) -> AdapterResult<crate::market_data::Ticker>;

    /// Newest candle last.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> AdapterResult<Vec<crate::market_data::Candle>>;

    async fn fetch_balance(&self) -> AdapterResult<Vec<BalanceInfo>>;

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> AdapterResult<Vec<Order>>;

    async fn place_market(&self, symbol: &str, side: Side, qty: f64) -> AdapterResult<Order>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> AdapterResult<BracketResult>;

    async fn query_order(&self, id: &str) -> AdapterResult<Order>;

    async fn cancel_order(&self, id: &str) -> AdapterResult<()>;

    async fn market_metadata(&self, symbol: &str) -> AdapterResult<MarketMetadata>;

    fn normalize_symbol(&self, canonical: &str) -> String;

    /// Whether this adapter can place entry + protective legs in a single
    /// atomic request (the executor's placement-preference step, §4.6 step 2).
    fn supports_atomic_bracket(&self) -> bool;
}
