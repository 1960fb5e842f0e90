// =============================================================================
// Engine configuration — loaded at process start, overlaid from environment
// variables and an optional on-disk JSON file
// =============================================================================
//
// Every field carries a serde default so that an older config file missing
// newly-added fields still deserializes. Persistence uses the atomic
// tmp-then-rename pattern to avoid corrupting the file on crash.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{AccountMode, TradingMode};

// ---- default-value helpers -------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec!["BTC/USD".into(), "ETH/USD".into(), "SOL/USD".into()]
}

fn default_trade_interval_sec() -> u64 {
    60
}

fn default_symbol_concurrency() -> usize {
    4
}

// indicator periods / multipliers
fn default_atr_period() -> usize {
    14
}
fn default_adx_period() -> usize {
    14
}
fn default_rsi_period() -> usize {
    14
}
fn default_bb_period() -> usize {
    20
}
fn default_bb_std_dev() -> f64 {
    2.0
}
fn default_sma_fast() -> usize {
    20
}
fn default_sma_slow() -> usize {
    50
}

// market filters
fn default_min_volatility_pct() -> f64 {
    0.1
}
fn default_min_volume() -> f64 {
    0.0
}
fn default_min_volume_percentile() -> f64 {
    0.0
}

// regime thresholds
fn default_adx_threshold() -> f64 {
    25.0
}
fn default_min_adx() -> f64 {
    15.0
}
fn default_atr_spike_multiplier() -> f64 {
    1.5
}
fn default_breakout_margin_atr() -> f64 {
    0.25
}
fn default_volume_spike_multiplier() -> f64 {
    1.5
}
fn default_max_range_width_pct() -> f64 {
    3.0
}
fn default_range_lower_percentile() -> f64 {
    0.25
}
fn default_rsi_range_max() -> f64 {
    55.0
}
fn default_trend_up_band_pct() -> f64 {
    0.2
}
fn default_trend_up_rsi_max() -> f64 {
    70.0
}

// risk
fn default_risk_per_trade_pct() -> f64 {
    1.0
}
fn default_max_active_risk_pct() -> f64 {
    5.0
}
fn default_max_position_usd() -> f64 {
    5_000.0
}
fn default_max_trades_per_day() -> u32 {
    30
}
fn default_max_trades_per_symbol() -> u32 {
    10
}
fn default_max_daily_loss_usd() -> f64 {
    100.0
}
fn default_min_risk_reward_ratio() -> f64 {
    1.5
}
fn default_max_leverage() -> f64 {
    1.0
}
fn default_max_margin_exposure_pct() -> f64 {
    0.0
}
fn default_min_fee_edge_multiplier() -> f64 {
    2.0
}
fn default_taker_fee_pct() -> f64 {
    0.26
}
fn default_maker_fee_pct() -> f64 {
    0.16
}

// state machine durations
fn default_symbol_cooldown_sec() -> u64 {
    900
}
fn default_global_pause_hours() -> f64 {
    6.0
}
fn default_profit_target_min() -> f64 {
    0.02
}
fn default_profit_target_max() -> f64 {
    0.04
}
fn default_profit_pause_hours() -> f64 {
    6.0
}

// watchdog
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_max_latency_ms() -> f64 {
    5000.0
}

// execution
fn default_limit_offset_bps() -> f64 {
    5.0
}
fn default_order_timeout_sec() -> u64 {
    15
}
fn default_order_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    MarketOnly,
    Bracket,
    LimitBracket,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Bracket
    }
}

/// Feature flags, all enabled by default so a bare config turns everything on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub profit_target: bool,
    #[serde(default = "default_true")]
    pub api_watchdog: bool,
    #[serde(default = "default_true")]
    pub multi_timeframe: bool,
    #[serde(default)]
    pub crypto_universe: bool,
    #[serde(default)]
    pub backtest: bool,
    /// Optional fee-edge gate (§4.7 step 7).
    #[serde(default)]
    pub fee_gate: bool,
    /// Optional regime filter gate (§4.7 step 8).
    #[serde(default)]
    pub regime_filter: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            profit_target: true,
            api_watchdog: true,
            multi_timeframe: true,
            crypto_universe: false,
            backtest: false,
            fee_gate: false,
            regime_filter: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    #[serde(default = "default_bb_std_dev")]
    pub bb_std_dev: f64,
    #[serde(default = "default_sma_fast")]
    pub sma_fast: usize,
    #[serde(default = "default_sma_slow")]
    pub sma_slow: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            atr_period: default_atr_period(),
            adx_period: default_adx_period(),
            rsi_period: default_rsi_period(),
            bb_period: default_bb_period(),
            bb_std_dev: default_bb_std_dev(),
            sma_fast: default_sma_fast(),
            sma_slow: default_sma_slow(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFilters {
    #[serde(default = "default_min_volatility_pct")]
    pub min_volatility_pct: f64,
    #[serde(default = "default_min_volume")]
    pub min_volume: f64,
    #[serde(default = "default_min_volume_percentile")]
    pub min_volume_percentile: f64,
}

impl Default for MarketFilters {
    fn default() -> Self {
        Self {
            min_volatility_pct: default_min_volatility_pct(),
            min_volume: default_min_volume(),
            min_volume_percentile: default_min_volume_percentile(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeThresholds {
    #[serde(default = "default_adx_threshold")]
    pub adx_threshold: f64,
    #[serde(default = "default_min_adx")]
    pub min_adx: f64,
    #[serde(default = "default_atr_spike_multiplier")]
    pub atr_spike_multiplier: f64,
    #[serde(default = "default_breakout_margin_atr")]
    pub breakout_margin_atr: f64,
    #[serde(default = "default_volume_spike_multiplier")]
    pub volume_spike_multiplier: f64,
    #[serde(default = "default_max_range_width_pct")]
    pub max_range_width_pct: f64,
    #[serde(default = "default_range_lower_percentile")]
    pub range_lower_percentile: f64,
    #[serde(default = "default_rsi_range_max")]
    pub rsi_range_max: f64,
    #[serde(default = "default_trend_up_band_pct")]
    pub trend_up_band_pct: f64,
    #[serde(default = "default_trend_up_rsi_max")]
    pub trend_up_rsi_max: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            adx_threshold: default_adx_threshold(),
            min_adx: default_min_adx(),
            atr_spike_multiplier: default_atr_spike_multiplier(),
            breakout_margin_atr: default_breakout_margin_atr(),
            volume_spike_multiplier: default_volume_spike_multiplier(),
            max_range_width_pct: default_max_range_width_pct(),
            range_lower_percentile: default_range_lower_percentile(),
            rsi_range_max: default_rsi_range_max(),
            trend_up_band_pct: default_trend_up_band_pct(),
            trend_up_rsi_max: default_trend_up_rsi_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,
    #[serde(default = "default_max_active_risk_pct")]
    pub max_active_risk_pct: f64,
    #[serde(default = "default_max_position_usd")]
    pub max_position_usd: f64,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    #[serde(default = "default_max_trades_per_symbol")]
    pub max_trades_per_symbol: u32,
    #[serde(default = "default_max_daily_loss_usd")]
    pub max_daily_loss_usd: f64,
    #[serde(default = "default_min_risk_reward_ratio")]
    pub min_risk_reward_ratio: f64,
    #[serde(default)]
    pub enable_shorts: bool,
    #[serde(default)]
    pub margin_eligible: bool,
    /// Hard-capped to 2.0 regardless of configured value; see `sanitize`.
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    #[serde(default = "default_max_margin_exposure_pct")]
    pub max_margin_exposure_pct: f64,
    #[serde(default = "default_min_fee_edge_multiplier")]
    pub min_fee_edge_multiplier: f64,
    #[serde(default = "default_taker_fee_pct")]
    pub taker_fee_pct: f64,
    #[serde(default = "default_maker_fee_pct")]
    pub maker_fee_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: default_risk_per_trade_pct(),
            max_active_risk_pct: default_max_active_risk_pct(),
            max_position_usd: default_max_position_usd(),
            max_trades_per_day: default_max_trades_per_day(),
            max_trades_per_symbol: default_max_trades_per_symbol(),
            max_daily_loss_usd: default_max_daily_loss_usd(),
            min_risk_reward_ratio: default_min_risk_reward_ratio(),
            enable_shorts: false,
            margin_eligible: false,
            max_leverage: default_max_leverage(),
            max_margin_exposure_pct: default_max_margin_exposure_pct(),
            min_fee_edge_multiplier: default_min_fee_edge_multiplier(),
            taker_fee_pct: default_taker_fee_pct(),
            maker_fee_pct: default_maker_fee_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_limit_offset_bps")]
    pub limit_offset_bps: f64,
    #[serde(default = "default_order_timeout_sec")]
    pub order_timeout_sec: u64,
    #[serde(default = "default_order_retries")]
    pub order_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            limit_offset_bps: default_limit_offset_bps(),
            order_timeout_sec: default_order_timeout_sec(),
            order_retries: default_order_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineConfig {
    #[serde(default = "default_symbol_cooldown_sec")]
    pub symbol_cooldown_sec: u64,
    #[serde(default = "default_global_pause_hours")]
    pub global_pause_hours: f64,
    #[serde(default = "default_profit_target_min")]
    pub profit_target_min: f64,
    #[serde(default = "default_profit_target_max")]
    pub profit_target_max: f64,
    #[serde(default = "default_profit_pause_hours")]
    pub profit_pause_hours: f64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: f64,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            symbol_cooldown_sec: default_symbol_cooldown_sec(),
            global_pause_hours: default_global_pause_hours(),
            profit_target_min: default_profit_target_min(),
            profit_target_max: default_profit_target_max(),
            profit_pause_hours: default_profit_pause_hours(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_latency_ms: default_max_latency_ms(),
        }
    }
}

/// Top-level engine configuration. Every field has a serde default so older
/// JSON config files never fail to load after a new field is added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub account_mode: AccountMode,

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub symbol_whitelist: Vec<String>,
    #[serde(default)]
    pub symbol_blacklist: Vec<String>,

    #[serde(default = "default_trade_interval_sec")]
    pub trade_interval_sec: u64,
    #[serde(default = "default_symbol_concurrency")]
    pub symbol_concurrency: usize,

    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub market_filters: MarketFilters,
    #[serde(default)]
    pub regime: RegimeThresholds,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub state_machine: StateMachineConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Paper,
            symbols: default_symbols(),
            symbol_whitelist: Vec::new(),
            symbol_blacklist: Vec::new(),
            trade_interval_sec: default_trade_interval_sec(),
            symbol_concurrency: default_symbol_concurrency(),
            indicators: IndicatorConfig::default(),
            market_filters: MarketFilters::default(),
            regime: RegimeThresholds::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            state_machine: StateMachineConfig::default(),
            features: FeatureFlags::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file, then clamp invariant-bearing fields.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        config.sanitize();

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_mode = %config.trading_mode,
            "engine config loaded"
        );
        Ok(config)
    }

    /// Atomic write: tmp file then rename, to avoid a torn write on crash.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize engine config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config into place at {}", path.display()))?;
        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Enforce invariants that must hold regardless of what was in the file:
    /// §8 property 5 — `max_leverage <= 2.0` after load, regardless of input.
    pub fn sanitize(&mut self) {
        if self.risk.max_leverage > 2.0 {
            warn!(
                configured = self.risk.max_leverage,
                "max_leverage exceeds hard cap, clamping to 2.0"
            );
            self.risk.max_leverage = 2.0;
        }
        if self.risk.max_leverage < 1.0 {
            self.risk.max_leverage = 1.0;
        }
    }

    pub fn is_symbol_allowed(&self, symbol: &str) -> bool {
        if self.symbol_blacklist.iter().any(|s| s == symbol) {
            return false;
        }
        if self.symbol_whitelist.is_empty() {
            return true;
        }
        self.symbol_whitelist.iter().any(|s| s == symbol)
    }
}
