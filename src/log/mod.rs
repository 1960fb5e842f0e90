// =============================================================================
// Durable Log — write-through Postgres primary, NDJSON file fallback
// =============================================================================
//
// Every write goes to both sinks: the file sink first (always available,
// never fails the caller), then Postgres if a pool was configured. Reads
// prefer Postgres when present and fall back to the file sink on error or
// absence, so the engine never blocks on the database being reachable.
//
// Every record is stamped with `zin_version`, the config snapshot tag
// the operator can use to correlate a trade or decision with the exact
// config that produced it. The Postgres columns keep the `engine_version`
// name since that's the schema already in place; only the JSON tag key
// the spec mandates changes.

pub mod store;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::anomaly::Anomaly;
use crate::decision::Decision;
use crate::position::Trade;
use store::FileStore;

pub struct DurableLog {
    files: FileStore,
    pool: Option<PgPool>,
    engine_version: String,
}

impl DurableLog {
    /// `database_url: None` runs in file-only mode — never an error, since
    /// Postgres is a durability upgrade, not a hard requirement.
    pub async fn new(data_dir: impl Into<std::path::PathBuf>, database_url: Option<&str>, engine_version: impl Into<String>) -> Result<Self> {
        let files = FileStore::new(data_dir)?;
        let pool = match database_url {
            Some(url) => match PgPoolOptions::new().max_connections(5).connect(url).await {
                Ok(pool) => {
                    debug!("durable log connected to postgres");
                    Some(pool)
                }
                Err(e) => {
                    warn!(error = %e, "postgres unavailable, falling back to file-only logging");
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            files,
            pool,
            engine_version: engine_version.into(),
        })
    }

    fn tag(&self, mut value: Value) -> Value {
        if let Value::Object(ref mut map) = value {
            map.insert("zin_version".to_string(), json!(self.engine_version));
            map.insert("logged_at".to_string(), json!(Utc::now().to_rfc3339()));
        }
        value
    }

    pub async fn log_trade(&self, trade: &Trade) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let record = self.tag(serde_json::to_value(trade)?);
        self.files.append_ndjson("trades", &date, &record)?;

        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                "INSERT INTO trades (trade_date, engine_version, symbol, side, entry, exit, qty, realized_pnl, decision_id, payload) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(&date)
            .bind(&self.engine_version)
            .bind(&trade.symbol)
            .bind(trade.side.to_string())
            .bind(trade.entry)
            .bind(trade.exit)
            .bind(trade.qty)
            .bind(trade.realized_pnl)
            .bind(&trade.decision_id)
            .bind(&record)
            .execute(pool)
            .await;
            if let Err(e) = result {
                warn!(error = %e, "failed to write trade to postgres, file sink already has it");
            }
        }
        Ok(())
    }

    pub async fn log_decision(&self, decision: &Decision) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let record = self.tag(serde_json::to_value(decision)?);
        self.files.append_ndjson("decisions", &date, &record)?;

        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                "INSERT INTO decisions (decision_date, engine_version, symbol, action, reason, regime, confidence, executed) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&date)
            .bind(&self.engine_version)
            .bind(&decision.symbol)
            .bind(decision.action.to_string())
            .bind(&decision.reason)
            .bind(decision.regime.to_string())
            .bind(decision.confidence)
            .bind(decision.executed)
            .execute(pool)
            .await;
            if let Err(e) = result {
                warn!(error = %e, "failed to write decision to postgres, file sink already has it");
            }
        }
        Ok(())
    }

    pub async fn log_anomaly(&self, anomaly: &Anomaly) -> Result<()> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let record = self.tag(serde_json::to_value(anomaly)?);
        self.files.append_ndjson("anomalies", &date, &record)?;

        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                "INSERT INTO anomalies (engine_version, kind, severity, description, context) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&self.engine_version)
            .bind(&anomaly.kind)
            .bind(anomaly.severity.to_string())
            .bind(&anomaly.description)
            .bind(&anomaly.context)
            .execute(pool)
            .await;
            if let Err(e) = result {
                warn!(error = %e, "failed to write anomaly to postgres, file sink already has it");
            }
        }
        Ok(())
    }

    /// Upsert-by-date daily summary. Postgres uses `ON CONFLICT (summary_date)
    /// DO UPDATE`; the file sink just overwrites the date's JSON document.
    pub async fn log_daily_summary(&self, date: &str, summary: Value) -> Result<()> {
        let record = self.tag(summary);
        self.files.write_json("daily", date, &record)?;

        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                "INSERT INTO daily_summaries (summary_date, engine_version, payload) VALUES ($1, $2, $3) \
                 ON CONFLICT (summary_date) DO UPDATE SET engine_version = EXCLUDED.engine_version, payload = EXCLUDED.payload",
            )
            .bind(date)
            .bind(&self.engine_version)
            .bind(&record)
            .execute(pool)
            .await;
            if let Err(e) = result {
                warn!(error = %e, "failed to upsert daily summary to postgres, file sink already has it");
            }
        }
        Ok(())
    }

    pub async fn log_snapshot(&self, snapshot_id: &str, snapshot: Value) -> Result<()> {
        let record = self.tag(snapshot);
        self.files.write_json("snapshots", snapshot_id, &record)?;

        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                "INSERT INTO snapshots (snapshot_id, engine_version, payload) VALUES ($1, $2, $3) \
                 ON CONFLICT (snapshot_id) DO UPDATE SET engine_version = EXCLUDED.engine_version, payload = EXCLUDED.payload",
            )
            .bind(snapshot_id)
            .bind(&self.engine_version)
            .bind(&record)
            .execute(pool)
            .await;
            if let Err(e) = result {
                warn!(error = %e, "failed to upsert snapshot to postgres, file sink already has it");
            }
        }
        Ok(())
    }

    /// Read trades logged for `date`, preferring Postgres when connected.
    pub async fn read_trades(&self, date: &str) -> Vec<Value> {
        if let Some(pool) = &self.pool {
            let rows: Result<Vec<(Value,)>, _> =
                sqlx::query_as("SELECT payload FROM trades WHERE trade_date = $1")
                    .bind(date)
                    .fetch_all(pool)
                    .await;
            if let Ok(rows) = rows {
                return rows.into_iter().map(|(v,)| v).collect();
            }
            warn!(date, "postgres read failed, falling back to file sink");
        }
        self.files.read_ndjson("trades", date)
    }
}

pub type SharedDurableLog = Arc<DurableLog>;
