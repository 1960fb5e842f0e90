// =============================================================================
// Central Application State — the engine's wiring struct
// =============================================================================
//
// Owns every subsystem the autonomous loop touches on a tick: the exchange
// adapter, market data caches, the regime/HTF context, the risk control
// surface, the position book, the durable log, and the ring buffers the
// heartbeat reads from. `main.rs` builds exactly one of these, wraps it in
// `Arc`, and shares it across the per-symbol tick tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::anomaly::Anomaly;
use crate::commands::{CommandAck, OperatorCommand};
use crate::config::EngineConfig;
use crate::decision::Decision;
use crate::exchange::ExchangeAdapter;
use crate::execution::BracketExecutor;
use crate::log::SharedDurableLog;
use crate::market_data::{CandleBuffer, TickerCache};
use crate::position::PositionBook;
use crate::regime::HtfCache;
use crate::risk::{self, Cooldowns};
use crate::runtime_state::RuntimeState;
use crate::types::{Side, TradingMode};

const MAX_RECENT_DECISIONS: usize = 200;
const MAX_RECENT_ANOMALIES: usize = 100;

/// Default candle buffer capacity and TTL; generous enough to cover the
/// longest HTF lookback (1h SMA50 needs 50 hourly bars) without unbounded
/// growth.
const CANDLE_BUFFER_CAPACITY: usize = 500;
const CANDLE_BUFFER_TTL: Duration = Duration::from_secs(600);
const TICKER_TTL: Duration = Duration::from_secs(30);
const HTF_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct AppState {
    pub config: RwLock<EngineConfig>,
    pub exchange: Arc<dyn ExchangeAdapter>,

    pub candle_buffer: Arc<CandleBuffer>,
    pub ticker_cache: Arc<TickerCache>,
    pub htf_cache: HtfCache,

    pub positions: PositionBook,
    pub runtime: RuntimeState,
    pub cooldowns: Cooldowns,
    pub executor: BracketExecutor,

    pub log: SharedDurableLog,

    recent_decisions: RwLock<Vec<Decision>>,
    recent_anomalies: RwLock<Vec<Anomaly>>,

    equity_day_start: RwLock<f64>,
    state_version: AtomicU64,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: EngineConfig, exchange: Arc<dyn ExchangeAdapter>, log: SharedDurableLog, starting_equity: f64) -> Self {
        let runtime = RuntimeState::new(
            config.trading_mode,
            config.risk.max_trades_per_day,
            config.risk.max_trades_per_symbol,
            config.state_machine.profit_target_min,
            config.state_machine.profit_target_max,
            config.state_machine.profit_pause_hours,
            config.state_machine.max_consecutive_failures,
            config.state_machine.max_latency_ms,
            config.state_machine.global_pause_hours,
        );
        let cooldowns = Cooldowns::new(config.state_machine.symbol_cooldown_sec);
        let executor = BracketExecutor::new(exchange.clone());

        Self {
            config: RwLock::new(config),
            exchange,
            candle_buffer: Arc::new(CandleBuffer::new(CANDLE_BUFFER_CAPACITY, CANDLE_BUFFER_TTL)),
            ticker_cache: Arc::new(TickerCache::new(TICKER_TTL)),
            htf_cache: HtfCache::new(HTF_CACHE_TTL),
            positions: PositionBook::new(),
            runtime,
            cooldowns,
            executor,
            log,
            recent_decisions: RwLock::new(Vec::new()),
            recent_anomalies: RwLock::new(Vec::new()),
            equity_day_start: RwLock::new(starting_equity),
            state_version: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Decision / anomaly audit trails ─────────────────────────────────

    pub async fn record_decision(&self, decision: Decision) {
        if let Err(e) = self.log.log_decision(&decision).await {
            tracing::warn!(error = %e, decision_id = %decision.id, "failed to persist decision");
        }
        let mut recent = self.recent_decisions.write();
        recent.push(decision);
        while recent.len() > MAX_RECENT_DECISIONS {
            recent.remove(0);
        }
        drop(recent);
        self.increment_version();
    }

    pub async fn record_anomaly(&self, anomaly: Anomaly) {
        if let Err(e) = self.log.log_anomaly(&anomaly).await {
            tracing::warn!(error = %e, kind = %anomaly.kind, "failed to persist anomaly");
        }
        tracing::warn!(kind = %anomaly.kind, severity = %anomaly.severity, description = %anomaly.description, "anomaly recorded");
        let mut recent = self.recent_anomalies.write();
        recent.push(anomaly);
        while recent.len() > MAX_RECENT_ANOMALIES {
            recent.remove(0);
        }
        drop(recent);
        self.increment_version();
    }

    pub fn recent_decisions(&self, count: usize) -> Vec<Decision> {
        let recent = self.recent_decisions.read();
        let n = recent.len();
        recent[n.saturating_sub(count)..].to_vec()
    }

    pub fn recent_anomalies(&self, count: usize) -> Vec<Anomaly> {
        let recent = self.recent_anomalies.read();
        let n = recent.len();
        recent[n.saturating_sub(count)..].to_vec()
    }

    // ── Equity ───────────────────────────────────────────────────────────

    /// Mark-to-market equity: realized cash plus unrealized P&L on every
    /// open position, marked at the latest cached ticker price. Symbols
    /// with no fresh ticker are excluded from the unrealized sum rather
    /// than stalling the whole computation.
    pub fn equity(&self, realized_equity: f64) -> f64 {
        let open = self.positions.all_open();
        let marks: HashMap<String, f64> = open
            .iter()
            .filter_map(|p| self.ticker_cache.get(&p.symbol).map(|t| (p.symbol.clone(), t.last)))
            .collect();
        risk::mark_to_market_equity(realized_equity, &open, &marks)
    }

    pub fn equity_day_start(&self) -> f64 {
        *self.equity_day_start.read()
    }

    /// Called once at the start of each trading day (detected by the
    /// caller via date rollover) so the profit target's percentage basis
    /// resets along with the rest of the day-scoped state.
    pub fn reset_equity_day_start(&self, equity: f64) {
        *self.equity_day_start.write() = equity;
    }

    // ── Operator commands ────────────────────────────────────────────────

    /// Apply an operator command against current state. Sizing/risk-gate
    /// checks for `Open`/`Bracket` are the caller's responsibility before
    /// reaching here — this only performs the book-keeping side effect.
    pub fn apply_command(&self, command: OperatorCommand) -> CommandAck {
        match command {
            OperatorCommand::SellAll { symbol } => {
                let targets = match symbol {
                    Some(s) => vec![s],
                    None => self.positions.all_open().into_iter().map(|p| p.symbol).collect(),
                };
                if targets.is_empty() {
                    return CommandAck::rejected("no open positions to flatten");
                }
                for s in &targets {
                    self.cooldowns.mark_closed(s);
                }
                CommandAck::accepted()
            }
            OperatorCommand::Open { symbol, .. } | OperatorCommand::Bracket { symbol, .. } => {
                if self.runtime.is_killed() {
                    return CommandAck::rejected(format!("trading mode is killed, refusing command for {symbol}"));
                }
                CommandAck::accepted()
            }
        }
    }

    pub fn set_trading_mode(&self, mode: TradingMode) {
        self.runtime.set_trading_mode(mode);
        self.increment_version();
    }
}

/// Convenience used by the strategy/gate wiring to turn a `Side` into the
/// opposite-side flatten direction.
pub fn opposite(side: Side) -> Side {
    match side {
        Side::Long => Side::Short,
        Side::Short => Side::Long,
    }
}
