// =============================================================================
// Operator commands — typed messages consumed by the autonomous loop
// =============================================================================
//
// The chat command parser and transport are out of scope (spec §1); this
// only defines the typed shape the loop consumes once a command has already
// been parsed by that external component and handed to the core as a
// message, per spec §6's "core consumes these as typed messages" framing.

use serde::{Deserialize, Serialize};

use crate::types::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Flatten every open position for `symbol`, or every symbol when `None`.
    SellAll { symbol: Option<String> },
    /// Open a plain market position outside the normal strategy routing.
    Open { symbol: String, side: Side, qty: f64 },
    /// Open a position with explicit protective legs, bypassing the risk
    /// gate's sizing step but not its other checks.
    Bracket {
        symbol: String,
        side: Side,
        qty: f64,
        stop_loss: f64,
        take_profit: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAck {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl CommandAck {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_all_serializes_with_tagged_kind() {
        let cmd = OperatorCommand::SellAll { symbol: Some("BTC/USD".to_string()) };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"kind\":\"sell_all\""));
    }

    #[test]
    fn command_ack_helpers_set_expected_fields() {
        assert!(CommandAck::accepted().accepted);
        let rejected = CommandAck::rejected("cooldown active");
        assert!(!rejected.accepted);
        assert_eq!(rejected.reason.unwrap(), "cooldown active");
    }
}
