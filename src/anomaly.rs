// =============================================================================
// Anomaly — structured record of unexpected runtime conditions
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub ts: i64,
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    pub context: Value,
}

impl Anomaly {
    pub fn new(kind: impl Into<String>, severity: Severity, description: impl Into<String>, context: Value) -> Self {
        Self {
            ts: Utc::now().timestamp_millis(),
            kind: kind.into(),
            severity,
            description: description.into(),
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_anomaly_stamps_current_time_and_fields() {
        let a = Anomaly::new(
            "FlattenFailed",
            Severity::Critical,
            "residual quantity after flatten exceeded dust threshold",
            serde_json::json!({"symbol": "BTC/USD", "residual_qty": 0.3}),
        );
        assert_eq!(a.kind, "FlattenFailed");
        assert_eq!(a.severity, Severity::Critical);
        assert!(a.ts > 0);
    }
}
