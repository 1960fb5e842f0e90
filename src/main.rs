// =============================================================================
// Spot trading engine — entry point
// =============================================================================
//
// Starts in Paused mode regardless of what the on-disk config says; an
// operator must explicitly flip to Live. Each tick walks every configured
// symbol through fetch -> indicators -> regime -> strategy -> risk gate ->
// execution -> decision, then writes the heartbeat and sleeps.

mod anomaly;
mod app_state;
mod commands;
mod config;
mod decision;
mod errors;
mod exchange;
mod execution;
mod heartbeat;
mod indicators;
mod log;
mod market_data;
mod position;
mod regime;
mod risk;
mod runtime_state;
mod strategy;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::anomaly::{Anomaly, Severity};
use crate::app_state::AppState;
use crate::commands::OperatorCommand;
use crate::config::EngineConfig;
use crate::decision::Decision;
use crate::exchange::live::LiveExchange;
use crate::exchange::paper::{PaperExchange, PaperExchangeConfig};
use crate::exchange::{EntryKind, ExchangeAdapter};
use crate::execution::{resolve_size, outcome_anomaly, Outcome, SizingRequest};
use crate::heartbeat::{Heartbeat, SymbolSnapshot};
use crate::log::DurableLog;
use crate::market_data::{Candle, CandleKey};
use crate::regime::detector::detect;
use crate::regime::{Regime, RegimeSnapshot};
use crate::risk::{evaluate_gate, GateContext};
use crate::types::{AccountMode, TradingMode};

const HEARTBEAT_PATH: &str = "heartbeat.json";
const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("spot trading engine starting up");

    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load engine config, using defaults");
        EngineConfig::default()
    });

    // Safety: always start paused, regardless of what was persisted.
    config.trading_mode = TradingMode::Paused;
    config.sanitize();

    info!(
        symbols = ?config.symbols,
        account_mode = %config.account_mode,
        "engine configured"
    );

    let exchange: Arc<dyn ExchangeAdapter> = match config.account_mode {
        AccountMode::Live => {
            let api_key = std::env::var("KRAKEN_API_KEY").unwrap_or_default();
            let api_secret = std::env::var("KRAKEN_API_SECRET").unwrap_or_default();
            if api_key.is_empty() || api_secret.is_empty() {
                warn!("account_mode is Live but KRAKEN_API_KEY/KRAKEN_API_SECRET are unset");
            }
            Arc::new(LiveExchange::new(api_key, api_secret))
        }
        AccountMode::Paper => Arc::new(PaperExchange::new(PaperExchangeConfig {
            taker_fee_pct: config.risk.taker_fee_pct,
            maker_fee_pct: config.risk.maker_fee_pct,
            ..PaperExchangeConfig::default()
        })),
    };

    let database_url = std::env::var("DATABASE_URL").ok();
    let data_dir = std::env::var("ENGINE_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let log = Arc::new(
        DurableLog::new(data_dir, database_url.as_deref(), env!("CARGO_PKG_VERSION")).await?,
    );

    let starting_equity = match exchange.fetch_balance().await {
        Ok(balances) => balances.iter().map(|b| b.total()).sum::<f64>().max(0.0),
        Err(e) => {
            warn!(error = %e, "failed to fetch starting balance, defaulting equity to 0");
            0.0
        }
    };

    let symbols = config.symbols.clone();
    let trade_interval = Duration::from_secs(config.trade_interval_sec);
    let state = Arc::new(AppState::new(config, exchange, log, starting_equity));
    state.reset_equity_day_start(starting_equity);

    info!("engine initialized in Paused mode; flip to Live via an operator command to begin trading");

    let running_state = state.clone();
    tokio::spawn(async move {
        run_loop(running_state, symbols, trade_interval).await;
    });

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save engine config on shutdown");
    }

    info!("engine shut down");
    Ok(())
}

/// The autonomous loop: one iteration is the seven-step tick described in
/// the engine's operating contract. Runs until the process exits.
async fn run_loop(state: Arc<AppState>, symbols: Vec<String>, interval: Duration) {
    let mut last_day: Option<String> = None;
    loop {
        tick(&state, &symbols, &mut last_day).await;
        tokio::time::sleep(interval).await;
    }
}

async fn tick(state: &Arc<AppState>, symbols: &[String], last_day: &mut Option<String>) {
    let tick_started = std::time::Instant::now();

    // ── 1. Watchdog probe ────────────────────────────────────────────────
    let probe_started = std::time::Instant::now();
    let probe_symbol = symbols.first().cloned().unwrap_or_default();
    let probe_result = state.exchange.fetch_ticker(&probe_symbol).await;
    let latency = probe_started.elapsed();
    let health = state.runtime.watchdog.record(latency, probe_result.as_ref().err().map(|e| e.to_string()));
    if !health.is_healthy {
        warn!(consecutive_failures = health.consecutive_failures, "watchdog probe unhealthy");
    }

    // ── 2. Refresh equity, roll the trading day if it changed ───────────
    let realized_equity = state
        .exchange
        .fetch_balance()
        .await
        .map(|balances| balances.iter().map(|b| b.total()).sum::<f64>())
        .unwrap_or_else(|_| state.equity_day_start());
    let equity_now = state.equity(realized_equity);

    let today = chrono::Utc::now().date_naive().to_string();
    if last_day.as_deref() != Some(today.as_str()) {
        state.reset_equity_day_start(equity_now);
        *last_day = Some(today);
    }
    state.runtime.profit_target.update_equity(equity_now);

    // ── 2b. Stop/take-profit supervision on already-open positions ──────
    let mut actions = supervise_positions(state).await;

    // ── 3. Kill-switch check ─────────────────────────────────────────────
    if state.runtime.is_killed() {
        write_heartbeat(state, equity_now, &["engine killed, skipping tick".to_string()]);
        return;
    }

    let max_daily_loss_usd = state.config.read().risk.max_daily_loss_usd;
    let day_loss = state.equity_day_start() - equity_now;
    if day_loss >= max_daily_loss_usd {
        warn!(day_loss, equity_day_start = state.equity_day_start(), equity_now, "daily loss limit breached, killing engine");
        let flattened = flatten_all_positions(state, "daily loss limit breached").await;
        state.runtime.set_trading_mode(TradingMode::Killed);
        state.runtime.engage_global_pause();
        state
            .record_anomaly(Anomaly::new(
                "DailyLossLimitBreached",
                Severity::Critical,
                format!("equity dropped {day_loss:.2} since day start, exceeding max_daily_loss_usd {max_daily_loss_usd:.2}"),
                serde_json::json!({
                    "equity_day_start": state.equity_day_start(),
                    "equity_now": equity_now,
                    "positions_flattened": flattened,
                }),
            ))
            .await;
        write_heartbeat(state, equity_now, &["daily loss limit breached, engine killed".to_string()]);
        return;
    }

    // ── 4. Profit-target pause early-return ──────────────────────────────
    if state.runtime.profit_target.is_paused(equity_now) {
        info!(equity_now, "profit target reached for the day, pausing new entries");
        write_heartbeat(state, equity_now, &["daily profit target reached, paused".to_string()]);
        return;
    }

    // ── 5. Per-symbol evaluation ──────────────────────────────────────────
    let mut symbol_snapshots = std::collections::HashMap::new();

    for symbol in symbols {
        let config = state.config.read().clone();
        if !config.is_symbol_allowed(symbol) {
            continue;
        }

        let (action, snapshot) = evaluate_symbol(state, symbol, &config, equity_now).await;
        actions.push(format!("{symbol}: {action}"));
        symbol_snapshots.insert(symbol.clone(), snapshot);
    }

    // ── 6. Heartbeat persist ──────────────────────────────────────────────
    let hb = Heartbeat {
        running: true,
        last_loop_at: chrono::Utc::now(),
        equity_now,
        equity_day_start: state.equity_day_start(),
        paused: state.runtime.is_globally_paused(),
        cooldowns: std::collections::HashMap::new(),
        symbols: symbol_snapshots,
        last_actions: actions,
    };
    if let Err(e) = hb.save(HEARTBEAT_PATH) {
        error!(error = %e, "failed to persist heartbeat");
    }

    info!(elapsed_ms = tick_started.elapsed().as_millis() as u64, "tick complete");
}

/// Close (part of) a position and write every resulting `Trade` through the
/// durable log, so a closed lot is never left unaudited (spec §5: a Trade
/// record always follows the Decision that produced it).
async fn close_and_log(state: &Arc<AppState>, symbol: &str, qty: f64, exit_price: f64, ts_close: i64, reason: &str) -> Vec<position::Trade> {
    let trades = state.positions.close(symbol, qty, exit_price, ts_close, reason);
    for trade in &trades {
        if let Err(e) = state.log.log_trade(trade).await {
            warn!(symbol, error = %e, "failed to persist trade");
        }
    }
    trades
}

/// Check every open position's latest cached ticker against its bracket and
/// close/log any that have crossed their stop or take-profit. A position
/// missing a fresh ticker is left alone until one arrives.
async fn supervise_positions(state: &Arc<AppState>) -> Vec<String> {
    let mut actions = Vec::new();
    for position in state.positions.all_open() {
        let Some(ticker) = state.ticker_cache.get(&position.symbol) else {
            continue;
        };
        let price = ticker.last;
        let reason = match position.side {
            types::Side::Long if price <= position.stop => Some("stop loss hit"),
            types::Side::Long if price >= position.target => Some("take profit hit"),
            types::Side::Short if price >= position.stop => Some("stop loss hit"),
            types::Side::Short if price <= position.target => Some("take profit hit"),
            _ => None,
        };
        let Some(reason) = reason else { continue };
        let trades = close_and_log(state, &position.symbol, position.quantity, price, chrono::Utc::now().timestamp_millis(), reason).await;
        if !trades.is_empty() {
            state.cooldowns.mark_closed(&position.symbol);
            actions.push(format!("{}: closed ({reason})", position.symbol));
        }
    }
    actions
}

/// Flatten every open position at the best available price (a fresh ticker
/// fetch, falling back to the cache, falling back to entry price) and log
/// each resulting `Trade`. Used by the kill switch, which must not leave a
/// position open once the engine has stopped trading for the day.
async fn flatten_all_positions(state: &Arc<AppState>, reason: &str) -> usize {
    let mut count = 0;
    for position in state.positions.all_open() {
        let price = match state.exchange.fetch_ticker(&position.symbol).await {
            Ok(t) if t.is_valid() => t.last,
            _ => state
                .ticker_cache
                .get(&position.symbol)
                .map(|t| t.last)
                .unwrap_or(position.entry_price),
        };
        let trades = close_and_log(state, &position.symbol, position.quantity, price, chrono::Utc::now().timestamp_millis(), reason).await;
        if !trades.is_empty() {
            state.cooldowns.mark_closed(&position.symbol);
            count += 1;
        }
    }
    count
}

/// Fetch candles, compute the regime/HTF context, route through the
/// strategy, clear the risk gate, and execute. Returns a short summary
/// string for the heartbeat's `last_actions` and the symbol's snapshot.
async fn evaluate_symbol(
    state: &Arc<AppState>,
    symbol: &str,
    config: &EngineConfig,
    equity_now: f64,
) -> (String, SymbolSnapshot) {
    let timeframe = "5m";
    let key = CandleKey::new(symbol, timeframe);

    match state.exchange.fetch_ohlcv(symbol, timeframe, 200).await {
        Ok(candles) => {
            for candle in &candles {
                if candle.is_valid() {
                    state.candle_buffer.update(key.clone(), candle.clone());
                }
            }
        }
        Err(e) => {
            warn!(symbol, error = %e, "failed to fetch candles");
        }
    }
    if let Ok(ticker) = state.exchange.fetch_ticker(symbol).await {
        if ticker.is_valid() {
            state.ticker_cache.put(ticker);
        }
    }

    if config.features.multi_timeframe {
        for htf_timeframe in ["15m", "1h"] {
            match state.exchange.fetch_ohlcv(symbol, htf_timeframe, 60).await {
                Ok(candles) => {
                    let htf_key = CandleKey::new(symbol, htf_timeframe);
                    for candle in &candles {
                        if candle.is_valid() {
                            state.candle_buffer.update(htf_key.clone(), candle.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol, timeframe = htf_timeframe, error = %e, "failed to fetch HTF candles");
                }
            }
        }
    }

    let candles: Vec<Candle> = state.candle_buffer.get_closed(&key, 200);
    let htf = if config.features.multi_timeframe {
        state.htf_cache.get_or_compute(&state.candle_buffer, symbol)
    } else {
        None
    };

    let Some(regime) = detect(&candles, htf.as_ref(), &config.indicators, &config.market_filters, &config.regime) else {
        let snapshot = SymbolSnapshot {
            price: candles.last().map(|c| c.close).unwrap_or(0.0),
            position_open: state.positions.is_open(symbol),
            position_side: None,
            unrealized_pnl: None,
            last_reason: "insufficient candle history".to_string(),
        };
        return (format!("{symbol}: insufficient history"), snapshot);
    };

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let signal = strategy::evaluate(&regime, htf.as_ref(), &closes, &config.indicators, &config.regime, config.risk.enable_shorts);

    let existing = state.positions.get(symbol);
    let decision = if let Some(side) = signal.side {
        if existing.is_some() {
            Decision::new(symbol, decision::Action::Skip, Some(side), "position already open", regime.regime, signal.confidence, strategy::to_indicator_snapshot(&regime))
        } else {
            let round_trip_fee_pct = config.risk.taker_fee_pct * 2.0;
            let open_positions = state.positions.all_open();
            let candidate_risk_usd = equity_now * config.risk.risk_per_trade_pct / 100.0 * signal.size_multiplier;
            let ctx = GateContext {
                symbol,
                side,
                entry_price: signal.entry_price,
                stop: signal.stop_loss,
                target: signal.take_profit,
                equity: equity_now,
                open_positions: &open_positions,
                candidate_risk_usd,
                global_paused: state.runtime.is_globally_paused(),
                enable_shorts: config.risk.enable_shorts,
                margin_eligible: config.risk.margin_eligible,
                max_active_risk_pct: config.risk.max_active_risk_pct,
                min_risk_reward_ratio: config.risk.min_risk_reward_ratio,
                fee_gate_enabled: config.features.fee_gate,
                min_fee_edge_multiplier: config.risk.min_fee_edge_multiplier,
                round_trip_fee_pct,
                regime_filter_enabled: config.features.regime_filter,
                regime_allows_entry: !matches!(regime.regime, Regime::NoTrade),
            };

            match evaluate_gate(&ctx, &state.runtime.daily_limits, &state.cooldowns, &state.runtime.profit_target) {
                Ok(()) => execute_signal(state, symbol, config, &regime, &signal, equity_now).await,
                Err(reason) => Decision::new(symbol, decision::Action::Skip, Some(side), reason, regime.regime, signal.confidence, strategy::to_indicator_snapshot(&regime)),
            }
        }
    } else {
        Decision::new(symbol, signal.action, None, signal.reason.clone(), regime.regime, signal.confidence, strategy::to_indicator_snapshot(&regime))
    };

    let summary = format!("{symbol}: {} ({})", decision.action, decision.reason);
    let position_after = state.positions.get(symbol);
    let snapshot = SymbolSnapshot {
        price: regime.price,
        position_open: position_after.is_some(),
        position_side: position_after.as_ref().map(|p| p.side.to_string()),
        unrealized_pnl: position_after.as_ref().map(|p| p.unrealized_pnl(regime.price)),
        last_reason: decision.reason.clone(),
    };

    state.record_decision(decision).await;
    (summary, snapshot)
}

/// Size, gate-clear the position against exchange minimums, and place the
/// bracket. Books the position on success; records an anomaly on any
/// non-`Protected` outcome.
async fn execute_signal(
    state: &Arc<AppState>,
    symbol: &str,
    config: &EngineConfig,
    regime: &RegimeSnapshot,
    signal: &strategy::TradeSignal,
    equity_now: f64,
) -> Decision {
    let side = signal.side.expect("execute_signal called without a resolved side");

    let metadata = match state.exchange.market_metadata(symbol).await {
        Ok(m) => m,
        Err(e) => {
            return Decision::new(symbol, decision::Action::Skip, Some(side), format!("market metadata unavailable: {e}"), regime.regime, signal.confidence, strategy::to_indicator_snapshot(regime));
        }
    };

    let risk_usd = equity_now * config.risk.risk_per_trade_pct / 100.0 * signal.size_multiplier;
    let risk_per_unit = match side {
        types::Side::Long => signal.entry_price - signal.stop_loss,
        types::Side::Short => signal.stop_loss - signal.entry_price,
    };
    if risk_per_unit <= 0.0 {
        return Decision::new(symbol, decision::Action::Skip, Some(side), "non-positive risk per unit, refusing to size", regime.regime, signal.confidence, strategy::to_indicator_snapshot(regime));
    }
    let computed_qty = risk_usd / risk_per_unit;

    let sizing = SizingRequest {
        computed_qty,
        price: signal.entry_price,
        max_position_usd: config.risk.max_position_usd,
    };
    let qty = match resolve_size(&sizing, &metadata) {
        Ok(q) => q,
        Err(reason) => {
            return Decision::new(symbol, decision::Action::Skip, Some(side), reason, regime.regime, signal.confidence, strategy::to_indicator_snapshot(regime));
        }
    };

    let correlation_id = uuid::Uuid::new_v4().to_string();
    let outcome = state
        .executor
        .execute(symbol, side, qty, EntryKind::Market, signal.stop_loss, Some(signal.take_profit), &correlation_id)
        .await;

    if let Some(anomaly) = outcome_anomaly(symbol, &outcome) {
        if matches!(outcome, Outcome::CriticalFailure { .. }) {
            state.runtime.engage_global_pause();
        }
        state.record_anomaly(anomaly).await;
    }

    let (action, executed, reason) = match &outcome {
        Outcome::Protected { .. } => {
            let open_ts = chrono::Utc::now().timestamp_millis();
            match state.positions.open(symbol, side, qty, signal.entry_price, signal.stop_loss, signal.take_profit, open_ts, &correlation_id) {
                Ok(()) => {
                    let open_trade = position::Trade {
                        id: correlation_id.clone(),
                        ts_open: open_ts,
                        ts_close: None,
                        symbol: symbol.to_string(),
                        side,
                        entry: signal.entry_price,
                        exit: None,
                        qty,
                        realized_pnl: None,
                        reason_open: signal.reason.clone(),
                        reason_close: None,
                        decision_id: correlation_id.clone(),
                    };
                    if let Err(e) = state.log.log_trade(&open_trade).await {
                        warn!(symbol, error = %e, "failed to persist open trade record");
                    }
                }
                Err(e) => warn!(symbol, error = %e, "failed to book filled position"),
            }
            state.cooldowns.mark_closed(symbol);
            state.runtime.daily_limits.record(symbol);
            (signal.action, true, signal.reason.clone())
        }
        Outcome::Skipped(reason) => (decision::Action::Skip, false, reason.clone()),
        Outcome::Aborted(reason) => (decision::Action::Skip, false, reason.clone()),
        Outcome::Flattened { reason, .. } => (decision::Action::Skip, false, reason.clone()),
        Outcome::CriticalFailure { reason, .. } => (decision::Action::Skip, false, reason.clone()),
    };

    let mut decision = Decision::new(symbol, action, Some(side), reason, regime.regime, signal.confidence, strategy::to_indicator_snapshot(regime));
    if executed {
        decision = decision.mark_executed();
    }
    decision
}

fn write_heartbeat(state: &Arc<AppState>, equity_now: f64, actions: &[String]) {
    let hb = Heartbeat {
        running: true,
        last_loop_at: chrono::Utc::now(),
        equity_now,
        equity_day_start: state.equity_day_start(),
        paused: state.runtime.is_globally_paused(),
        cooldowns: std::collections::HashMap::new(),
        symbols: std::collections::HashMap::new(),
        last_actions: actions.to_vec(),
    };
    if let Err(e) = hb.save(HEARTBEAT_PATH) {
        error!(error = %e, "failed to persist heartbeat");
    }
}

/// Apply an operator command received from the external command surface
/// (spec §6). Not wired to a transport here; the transport is out of scope.
#[allow(dead_code)]
async fn handle_command(state: &Arc<AppState>, command: OperatorCommand) -> commands::CommandAck {
    state.apply_command(command)
}
