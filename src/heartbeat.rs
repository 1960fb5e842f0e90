// =============================================================================
// Heartbeat — atomic-write state document for operator visibility
// =============================================================================
//
// Written once per loop iteration to a fixed path using the same
// tmp-then-rename pattern as `EngineConfig::save`, so an operator tailing
// the file never reads a torn write.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub price: f64,
    pub position_open: bool,
    pub position_side: Option<String>,
    pub unrealized_pnl: Option<f64>,
    pub last_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub running: bool,
    pub last_loop_at: DateTime<Utc>,
    pub equity_now: f64,
    pub equity_day_start: f64,
    pub paused: bool,
    pub cooldowns: HashMap<String, DateTime<Utc>>,
    pub symbols: HashMap<String, SymbolSnapshot>,
    pub last_actions: Vec<String>,
}

impl Heartbeat {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize heartbeat")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp heartbeat to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp heartbeat into place at {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read heartbeat from {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse heartbeat from {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Heartbeat {
        let mut symbols = HashMap::new();
        symbols.insert(
            "BTC/USD".to_string(),
            SymbolSnapshot {
                price: 100.0,
                position_open: false,
                position_side: None,
                unrealized_pnl: None,
                last_reason: "trend up but price not near SMA20".to_string(),
            },
        );
        Heartbeat {
            running: true,
            last_loop_at: Utc::now(),
            equity_now: 10_050.0,
            equity_day_start: 10_000.0,
            paused: false,
            cooldowns: HashMap::new(),
            symbols,
            last_actions: vec!["BTC/USD: hold".to_string()],
        }
    }

    #[test]
    fn atomic_save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("heartbeat_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("heartbeat.json");
        let hb = sample();
        hb.save(&path).unwrap();
        let loaded = Heartbeat::load(&path).unwrap();
        assert_eq!(loaded.equity_now, 10_050.0);
        assert!(loaded.symbols.contains_key("BTC/USD"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn save_leaves_no_tmp_file_behind() {
        let dir = std::env::temp_dir().join(format!("heartbeat_test2_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("heartbeat.json");
        sample().save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
