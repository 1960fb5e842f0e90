// =============================================================================
// Bracket executor — places entry + protective legs, flattens on failure
// =============================================================================
//
// State machine (spec §4.6):
//   Init -> EntryPending -> { Aborted | Protected }
//   Protected -> { Closed | FlattenAttempt -> { Flattened | CriticalFailure } }
//
// Every call carries a caller-supplied correlation id. Re-submitting the
// same id after a crash must not double-place an order; `query_order`
// against a previously-recorded order id is the idempotency check.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::anomaly::{Anomaly, Severity};
use crate::exchange::{AdapterResult, BracketResult, EntryKind, ExchangeAdapter, MarketMetadata};
use crate::types::{base_asset, Order, OrderStatus, Side};

/// Quantity below which a residual balance after a flatten attempt is
/// considered fully closed rather than a critical failure.
const DUST_QTY: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Entry was never placed; the candidate was skipped pre-flight.
    Skipped(String),
    /// Entry placement itself failed or was rejected.
    Aborted(String),
    /// Entry and both protective legs are live.
    Protected {
        entry_order: Order,
        stop_order: Option<Order>,
        take_profit_order: Option<Order>,
    },
    /// A protective leg failed to place and the entry was successfully
    /// flattened back to flat (residual within dust tolerance).
    Flattened { entry_order: Order, reason: String },
    /// A protective leg failed to place AND the flatten attempt left a
    /// non-dust residual position open with no protection. This is the
    /// worst case the executor can reach and always raises a CRITICAL
    /// anomaly plus a global pause recommendation.
    CriticalFailure { entry_order: Order, residual_qty: f64, reason: String },
}

/// Sizing inputs the executor pre-flight-checks and, if necessary, bumps or
/// rejects before ever touching the exchange (spec §8 min-size scenario).
pub struct SizingRequest {
    pub computed_qty: f64,
    pub price: f64,
    pub max_position_usd: f64,
}

/// Resolve a computed order size against exchange minimums. Bumps up to
/// `metadata.min_qty` when the computed size is smaller, then rejects if the
/// bumped notional would exceed `max_position_usd`.
pub fn resolve_size(request: &SizingRequest, metadata: &MarketMetadata) -> Result<f64, String> {
    let mut qty = request.computed_qty;
    if qty < metadata.min_qty {
        qty = metadata.min_qty;
    }
    let notional = qty * request.price;
    if notional < metadata.min_cost {
        return Err(format!(
            "notional {notional:.2} below exchange minimum {:.2}",
            metadata.min_cost
        ));
    }
    if notional > request.max_position_usd {
        return Err(format!(
            "bumped size {qty} at price {} = {notional:.2} exceeds max_position_usd {:.2}",
            request.price, request.max_position_usd
        ));
    }
    Ok(qty)
}

pub struct BracketExecutor {
    adapter: Arc<dyn ExchangeAdapter>,
}

impl BracketExecutor {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self { adapter }
    }

    /// Place an entry and its stop/take-profit legs for `symbol`. Prefers a
    /// single atomic placement when the adapter supports it; otherwise
    /// places the entry first and the protective legs as separate orders,
    /// flattening the entry if either protective leg fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        entry_kind: EntryKind,
        stop_price: f64,
        take_profit_price: Option<f64>,
        correlation_id: &str,
    ) -> Outcome {
        // Idempotency: if an order already exists under this correlation id
        // it was placed by a prior attempt that crashed before recording its
        // outcome; re-query rather than re-place.
        if let Ok(existing) = self.adapter.query_order(correlation_id).await {
            info!(correlation_id, "bracket already placed, returning existing order");
            return Outcome::Protected {
                entry_order: existing,
                stop_order: None,
                take_profit_order: None,
            };
        }

        let atomic = self.adapter.supports_atomic_bracket();
        let placed: AdapterResult<BracketResult> = self
            .adapter
            .place_bracket(
                symbol,
                side,
                qty,
                entry_kind,
                stop_price,
                take_profit_price,
                atomic,
                correlation_id,
            )
            .await;

        let bracket = match placed {
            Ok(b) => b,
            Err(e) => {
                warn!(symbol, correlation_id, error = %e, "bracket entry placement failed");
                return Outcome::Aborted(e.to_string());
            }
        };

        if bracket.stop_order.is_some() || bracket.atomic {
            info!(symbol, correlation_id, "bracket entry and protective legs placed");
            return Outcome::Protected {
                entry_order: bracket.entry_order,
                stop_order: bracket.stop_order,
                take_profit_order: bracket.take_profit_order,
            };
        }

        // Protective leg placement failed non-atomically: the entry is live
        // and naked. Flatten immediately.
        error!(
            symbol,
            correlation_id,
            "protective leg missing after non-atomic bracket placement, flattening entry"
        );
        self.flatten(symbol, side, qty, bracket.entry_order, correlation_id)
            .await
    }

    async fn flatten(&self, symbol: &str, side: Side, qty: f64, entry_order: Order, correlation_id: &str) -> Outcome {
        let opposite = match side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };

        let flatten_result = self.adapter.place_market(symbol, opposite, qty).await;
        if let Err(e) = flatten_result {
            error!(symbol, correlation_id, error = %e, "flatten order itself failed to place");
            return Outcome::CriticalFailure {
                entry_order,
                residual_qty: qty,
                reason: format!("flatten order failed to place: {e}"),
            };
        }

        // `symbol` is a pair ("BTC/USD"); balances are reported per currency
        // ("BTC"), so the re-query must key off the pair's base asset.
        let base = base_asset(symbol);
        let residual = match self.adapter.fetch_balance().await {
            Ok(balances) => balances
                .iter()
                .find(|b| b.asset == base)
                .map(|b| b.total())
                .unwrap_or(0.0),
            Err(_) => qty, // cannot confirm flatten succeeded; treat conservatively as unresolved
        };

        if residual.abs() <= DUST_QTY {
            warn!(symbol, correlation_id, "entry flattened successfully after protective leg failure");
            Outcome::Flattened {
                entry_order,
                reason: "protective leg failed to place, entry flattened".to_string(),
            }
        } else {
            error!(
                symbol,
                correlation_id,
                residual,
                "flatten left non-dust residual position, critical failure"
            );
            Outcome::CriticalFailure {
                entry_order,
                residual_qty: residual,
                reason: format!("residual quantity {residual} remained after flatten attempt"),
            }
        }
    }
}

/// Build the anomaly record for a terminal `Outcome`, or `None` for outcomes
/// that need no operator attention (`Protected`, plain `Skipped`).
pub fn outcome_anomaly(symbol: &str, outcome: &Outcome) -> Option<Anomaly> {
    match outcome {
        Outcome::Aborted(reason) => Some(Anomaly::new(
            "BracketAborted",
            Severity::Warning,
            reason.clone(),
            serde_json::json!({"symbol": symbol}),
        )),
        Outcome::Flattened { reason, .. } => Some(Anomaly::new(
            "BracketFlattened",
            Severity::Warning,
            reason.clone(),
            serde_json::json!({"symbol": symbol}),
        )),
        Outcome::CriticalFailure { residual_qty, reason, .. } => Some(Anomaly::new(
            "BracketCriticalFailure",
            Severity::Critical,
            reason.clone(),
            serde_json::json!({"symbol": symbol, "residual_qty": residual_qty}),
        )),
        Outcome::Skipped(_) | Outcome::Protected { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BalanceInfo, OrderType};
    use async_trait::async_trait;

    /// Minimal adapter stub for exercising `flatten()` directly: every
    /// non-balance call succeeds trivially, and the residual balance it
    /// reports after a flatten is fixed per test.
    struct StubAdapter {
        residual_base_qty: f64,
    }

    #[async_trait]
    impl ExchangeAdapter for StubAdapter {
        async fn fetch_ticker(&self, _symbol: &str) -> AdapterResult<crate::market_data::Ticker> {
            unimplemented!()
        }
        async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> AdapterResult<Vec<crate::market_data::Candle>> {
            unimplemented!()
        }
        async fn fetch_balance(&self) -> AdapterResult<Vec<BalanceInfo>> {
            Ok(vec![BalanceInfo {
                asset: "BTC".to_string(),
                free: self.residual_base_qty,
                locked: 0.0,
            }])
        }
        async fn fetch_open_orders(&self, _symbol: Option<&str>) -> AdapterResult<Vec<Order>> {
            unimplemented!()
        }
        async fn place_market(&self, symbol: &str, side: Side, qty: f64) -> AdapterResult<Order> {
            Ok(Order {
                id: "stub".to_string(),
                symbol: symbol.to_string(),
                side,
                order_type: OrderType::Market,
                qty,
                limit_price: None,
                stop_price: None,
                reduce_only: true,
                status: OrderStatus::Filled,
                filled_qty: qty,
                avg_fill_price: Some(100.0),
            })
        }
        async fn place_bracket(
            &self,
            _symbol: &str,
            _side: Side,
            _qty: f64,
            _entry_kind: EntryKind,
            _stop_price: f64,
            _take_profit_price: Option<f64>,
            _atomic: bool,
            _correlation_id: &str,
        ) -> AdapterResult<BracketResult> {
            unimplemented!()
        }
        async fn query_order(&self, _id: &str) -> AdapterResult<Order> {
            unimplemented!()
        }
        async fn cancel_order(&self, _id: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn market_metadata(&self, _symbol: &str) -> AdapterResult<MarketMetadata> {
            unimplemented!()
        }
        fn normalize_symbol(&self, canonical: &str) -> String {
            canonical.to_string()
        }
        fn supports_atomic_bracket(&self) -> bool {
            false
        }
    }

    fn dummy_entry() -> Order {
        Order {
            id: "entry-1".to_string(),
            symbol: "BTC/USD".to_string(),
            side: Side::Long,
            order_type: OrderType::Market,
            qty: 1.0,
            limit_price: None,
            stop_price: None,
            reduce_only: false,
            status: OrderStatus::Filled,
            filled_qty: 1.0,
            avg_fill_price: Some(100.0),
        }
    }

    #[tokio::test]
    async fn flatten_reads_residual_from_the_pair_base_asset_not_the_pair_string() {
        // Balance is reported under "BTC" (base asset), never under the pair
        // string "BTC/USD"; flatten must key its lookup off the base asset
        // to see the residual at all.
        let executor = BracketExecutor::new(Arc::new(StubAdapter { residual_base_qty: 0.5 }));
        let outcome = executor.flatten("BTC/USD", Side::Long, 1.0, dummy_entry(), "corr-1").await;
        assert!(matches!(outcome, Outcome::CriticalFailure { residual_qty, .. } if residual_qty == 0.5));
    }

    #[tokio::test]
    async fn flatten_reports_flattened_when_base_asset_residual_is_dust() {
        let executor = BracketExecutor::new(Arc::new(StubAdapter { residual_base_qty: 0.0 }));
        let outcome = executor.flatten("BTC/USD", Side::Long, 1.0, dummy_entry(), "corr-1").await;
        assert!(matches!(outcome, Outcome::Flattened { .. }));
    }

    fn metadata(min_qty: f64, min_cost: f64) -> MarketMetadata {
        MarketMetadata {
            min_qty,
            min_cost,
            price_precision: 2,
            qty_precision: 8,
        }
    }

    #[test]
    fn resolve_size_bumps_up_to_min_qty() {
        let req = SizingRequest {
            computed_qty: 0.007,
            price: 100.0,
            max_position_usd: 5.0,
        };
        // 0.01 * 100 = 1.00 < min_cost so still fails on cost, not size
        let result = resolve_size(&req, &metadata(0.01, 0.5));
        assert_eq!(result, Ok(0.01));
    }

    #[test]
    fn resolve_size_rejects_when_bumped_notional_exceeds_cap() {
        let req = SizingRequest {
            computed_qty: 0.007,
            price: 100.0,
            max_position_usd: 0.5, // 0.01 * 100 = 1.0 > 0.5
        };
        let result = resolve_size(&req, &metadata(0.01, 0.1));
        assert!(result.is_err());
    }

    #[test]
    fn resolve_size_rejects_below_min_cost() {
        let req = SizingRequest {
            computed_qty: 0.0001,
            price: 10.0,
            max_position_usd: 1000.0,
        };
        let result = resolve_size(&req, &metadata(0.0001, 10.0));
        assert!(result.is_err());
    }

    fn dummy_order(status: OrderStatus) -> Order {
        Order {
            id: "x".to_string(),
            symbol: "BTC/USD".to_string(),
            side: Side::Long,
            order_type: crate::types::OrderType::Market,
            qty: 1.0,
            limit_price: None,
            stop_price: None,
            reduce_only: false,
            status,
            filled_qty: 1.0,
            avg_fill_price: Some(100.0),
        }
    }

    #[test]
    fn outcome_anomaly_is_critical_for_critical_failure() {
        let outcome = Outcome::CriticalFailure {
            entry_order: dummy_order(OrderStatus::Filled),
            residual_qty: 0.3,
            reason: "residual remained".to_string(),
        };
        let anomaly = outcome_anomaly("BTC/USD", &outcome).unwrap();
        assert_eq!(anomaly.severity, Severity::Critical);
    }

    #[test]
    fn outcome_anomaly_is_none_for_protected() {
        let outcome = Outcome::Protected {
            entry_order: dummy_order(OrderStatus::Filled),
            stop_order: None,
            take_profit_order: None,
        };
        assert!(outcome_anomaly("BTC/USD", &outcome).is_none());
    }
}
