// =============================================================================
// Position & Trade bookkeeping
// =============================================================================
//
// A `Position` is the live, symbol-scoped holding the engine is tracking.
// Its `stop`/`target` must bracket `entry_price` in the direction implied by
// `side` — `is_valid()` enforces that invariant everywhere a position is
// constructed or mutated.
//
// Quantity is tracked as a FIFO queue of lots so a symbol that accumulates
// multiple entries (scale-ins) closes out oldest-lot-first, the same way a
// tax lot accounting system would. A `Trade` is the closed, auditable record
// produced when a lot (or part of one) is closed.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::types::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lot {
    qty: f64,
    entry_price: f64,
    open_ts: i64,
    decision_id: String,
}

/// A live, symbol-scoped position. `stop`/`target` bracket `entry_price`:
/// for a long, `stop < entry_price < target`; for a short, the reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop: f64,
    pub target: f64,
    pub open_ts: i64,
    #[serde(skip)]
    lots: VecDeque<Lot>,
}

impl Position {
    pub fn is_valid(&self) -> bool {
        let bracket_ok = match self.side {
            Side::Long => self.stop < self.entry_price && self.entry_price < self.target,
            Side::Short => self.target < self.entry_price && self.entry_price < self.stop,
        };
        bracket_ok && self.quantity > 0.0
    }

    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        let direction = match self.side {
            Side::Long => 1.0,
            Side::Short => -1.0,
        };
        direction * (mark_price - self.entry_price) * self.quantity
    }
}

/// A closed or partially-closed execution record (spec §3 `Trade`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub ts_open: i64,
    pub ts_close: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub exit: Option<f64>,
    pub qty: f64,
    pub realized_pnl: Option<f64>,
    pub reason_open: String,
    pub reason_close: Option<String>,
    pub decision_id: String,
}

struct Book {
    open: HashMap<String, Position>,
    closed: Vec<Trade>,
}

/// Owns every open position and the full closed-trade ledger, keyed by
/// symbol. Spot-only builds hold at most one position per symbol but the
/// lot queue supports accumulating scale-ins into that single position.
pub struct PositionBook {
    book: RwLock<Book>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            book: RwLock::new(Book {
                open: HashMap::new(),
                closed: Vec::new(),
            }),
        }
    }

    /// Open a new position, or add a same-side lot to an existing one for
    /// the same symbol. Returns `Err` if an opposite-side position is
    /// already open for the symbol (the book never holds both sides at
    /// once) or if the resulting position would violate its bracket
    /// invariant.
    pub fn open(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        entry_price: f64,
        stop: f64,
        target: f64,
        open_ts: i64,
        decision_id: &str,
    ) -> Result<(), String> {
        let mut book = self.book.write();
        let lot = Lot {
            qty,
            entry_price,
            open_ts,
            decision_id: decision_id.to_string(),
        };

        if let Some(existing) = book.open.get_mut(symbol) {
            if existing.side != side {
                return Err(format!(
                    "symbol {symbol} already has an open {:?} position; cannot add {:?} lot",
                    existing.side, side
                ));
            }
            let total_qty = existing.quantity + qty;
            let blended_entry =
                (existing.entry_price * existing.quantity + entry_price * qty) / total_qty;
            existing.quantity = total_qty;
            existing.entry_price = blended_entry;
            existing.stop = stop;
            existing.target = target;
            existing.lots.push_back(lot);
            if !existing.is_valid() {
                return Err(format!("bracket invariant violated for {symbol} after scale-in"));
            }
        } else {
            let mut lots = VecDeque::new();
            lots.push_back(lot);
            let position = Position {
                symbol: symbol.to_string(),
                side,
                entry_price,
                quantity: qty,
                stop,
                target,
                open_ts,
                lots,
            };
            if !position.is_valid() {
                return Err(format!("bracket invariant violated opening {symbol}"));
            }
            book.open.insert(symbol.to_string(), position);
        }

        info!(symbol, ?side, qty, entry_price, stop, target, "position opened");
        Ok(())
    }

    /// Close up to `qty` of the symbol's position at `exit_price`, consuming
    /// lots oldest-first (FIFO). Returns the `Trade` records produced — one
    /// per lot touched, since each lot may have a distinct `decision_id` and
    /// entry price.
    pub fn close(
        &self,
        symbol: &str,
        qty: f64,
        exit_price: f64,
        ts_close: i64,
        reason_close: &str,
    ) -> Vec<Trade> {
        let mut book = self.book.write();
        let Some(position) = book.open.get_mut(symbol) else {
            return Vec::new();
        };

        let side = position.side;
        let direction = match side {
            Side::Long => 1.0,
            Side::Short => -1.0,
        };

        let mut remaining = qty.min(position.quantity);
        let mut trades = Vec::new();

        while remaining > f64::EPSILON {
            let Some(front) = position.lots.front_mut() else {
                break;
            };
            let take = front.qty.min(remaining);
            let realized_pnl = direction * (exit_price - front.entry_price) * take;

            trades.push(Trade {
                id: Uuid::new_v4().to_string(),
                ts_open: front.open_ts,
                ts_close: Some(ts_close),
                symbol: symbol.to_string(),
                side,
                entry: front.entry_price,
                exit: Some(exit_price),
                qty: take,
                realized_pnl: Some(realized_pnl),
                reason_open: "signal".to_string(),
                reason_close: Some(reason_close.to_string()),
                decision_id: front.decision_id.clone(),
            });

            front.qty -= take;
            remaining -= take;
            position.quantity -= take;
            if front.qty <= f64::EPSILON {
                position.lots.pop_front();
            }
        }

        let fully_closed = position.quantity <= f64::EPSILON || position.lots.is_empty();
        if fully_closed {
            book.open.remove(symbol);
        }

        info!(
            symbol,
            qty,
            exit_price,
            reason_close,
            trades = trades.len(),
            fully_closed,
            "position closed"
        );
        book.closed.extend(trades.clone());
        trades
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.book.read().open.get(symbol).cloned()
    }

    pub fn all_open(&self) -> Vec<Position> {
        self.book.read().open.values().cloned().collect()
    }

    pub fn is_open(&self, symbol: &str) -> bool {
        self.book.read().open.contains_key(symbol)
    }

    pub fn closed_trades(&self, count: usize) -> Vec<Trade> {
        let book = self.book.read();
        let n = book.closed.len();
        book.closed[n.saturating_sub(count)..].to_vec()
    }

    /// Sum of unrealized P&L across every open position, marked at the
    /// supplied per-symbol prices. Symbols missing a mark are skipped.
    pub fn total_unrealized_pnl(&self, marks: &HashMap<String, f64>) -> f64 {
        self.book
            .read()
            .open
            .values()
            .filter_map(|p| marks.get(&p.symbol).map(|&mark| p.unrealized_pnl(mark)))
            .sum()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> i64 {
        1_700_000_000_000
    }

    #[test]
    fn long_position_bracket_invariant_holds() {
        let book = PositionBook::new();
        assert!(book
            .open("BTC/USD", Side::Long, 1.0, 100.0, 98.0, 103.0, now(), "d1")
            .is_ok());
        let p = book.get("BTC/USD").unwrap();
        assert!(p.is_valid());
    }

    #[test]
    fn invalid_bracket_is_rejected() {
        let book = PositionBook::new();
        let result = book.open("BTC/USD", Side::Long, 1.0, 100.0, 101.0, 103.0, now(), "d1");
        assert!(result.is_err());
    }

    #[test]
    fn opposite_side_scale_in_is_rejected() {
        let book = PositionBook::new();
        book.open("BTC/USD", Side::Long, 1.0, 100.0, 98.0, 103.0, now(), "d1")
            .unwrap();
        let result = book.open("BTC/USD", Side::Short, 1.0, 100.0, 103.0, 98.0, now(), "d2");
        assert!(result.is_err());
    }

    #[test]
    fn fifo_close_consumes_oldest_lot_first() {
        let book = PositionBook::new();
        book.open("BTC/USD", Side::Long, 1.0, 100.0, 98.0, 110.0, now(), "d1")
            .unwrap();
        book.open("BTC/USD", Side::Long, 1.0, 104.0, 98.0, 110.0, now() + 1, "d2")
            .unwrap();

        let trades = book.close("BTC/USD", 1.0, 108.0, now() + 2, "take_profit");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].decision_id, "d1");
        assert_eq!(trades[0].realized_pnl, Some(8.0));
        assert!(book.is_open("BTC/USD"));
        assert_eq!(book.get("BTC/USD").unwrap().quantity, 1.0);
    }

    #[test]
    fn full_close_removes_position_and_sums_unrealized_to_zero() {
        let book = PositionBook::new();
        book.open("BTC/USD", Side::Long, 2.0, 100.0, 98.0, 110.0, now(), "d1")
            .unwrap();
        let trades = book.close("BTC/USD", 2.0, 109.0, now() + 5, "target_hit");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].realized_pnl, Some(18.0));
        assert!(!book.is_open("BTC/USD"));
    }

    #[test]
    fn total_unrealized_pnl_sums_across_symbols() {
        let book = PositionBook::new();
        book.open("BTC/USD", Side::Long, 1.0, 100.0, 98.0, 110.0, now(), "d1")
            .unwrap();
        book.open("ETH/USD", Side::Short, 2.0, 50.0, 52.0, 46.0, now(), "d2")
            .unwrap();
        let mut marks = HashMap::new();
        marks.insert("BTC/USD".to_string(), 105.0);
        marks.insert("ETH/USD".to_string(), 48.0);
        // long BTC: +5, short ETH: (50-48)*2 = +4
        assert_eq!(book.total_unrealized_pnl(&marks), 9.0);
    }
}
