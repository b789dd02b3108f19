use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    OrderPlaced,
    OrderCancelled,
    OrderFailed,
    PositionUpdate,
    System,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertType::OrderPlaced => "order_placed",
            AlertType::OrderCancelled => "order_cancelled",
            AlertType::OrderFailed => "order_failed",
            AlertType::PositionUpdate => "position_update",
            AlertType::System => "system",
        };
        write!(f, "{}", s)
    }
}

/// Operator-facing notification built from bus events by monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Identity used for redelivery dedup; order alerts reuse the order id.
    pub id: String,
    pub alert_type: AlertType,
    pub symbol: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}
