use crate::domain::market::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Entry,
    Exit,
    Adjust,
}

/// Downstream lifecycle of a signal; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Submitted,
    Rejected,
    Filled,
    Cancelled,
}

/// A trade recommendation emitted by a strategy and consumed by execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub strategy_name: String,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub signal_type: SignalType,
    pub price_target: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub risk_reward_ratio: Option<Decimal>,
    pub confidence_score: Decimal,
    pub execution_status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicator_id: Option<String>,
}

impl Signal {
    /// Risk and reward magnitudes implied by the price targets, if all of
    /// them are present.
    pub fn risk_reward(&self) -> Option<(Decimal, Decimal)> {
        let entry = self.price_target?;
        let stop = self.stop_loss?;
        let take = self.take_profit?;
        let (risk, reward) = match self.direction {
            Direction::Long => ((entry - stop).abs(), (take - entry).abs()),
            Direction::Short => ((stop - entry).abs(), (entry - take).abs()),
        };
        Some((risk, reward))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal() -> Signal {
        Signal {
            id: "sig-1".to_string(),
            strategy_name: "OrderBlock".to_string(),
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::OneHour,
            direction: Direction::Long,
            signal_type: SignalType::Entry,
            price_target: Some(dec!(68000)),
            stop_loss: Some(dec!(66000)),
            take_profit: Some(dec!(72000)),
            risk_reward_ratio: None,
            confidence_score: dec!(0.85),
            execution_status: ExecutionStatus::Pending,
            timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
            metadata: HashMap::new(),
            indicator_id: None,
        }
    }

    #[test]
    fn test_risk_reward_long() {
        let (risk, reward) = signal().risk_reward().unwrap();
        assert_eq!(risk, dec!(2000));
        assert_eq!(reward, dec!(4000));
    }

    #[test]
    fn test_risk_reward_short() {
        let mut s = signal();
        s.direction = Direction::Short;
        s.price_target = Some(dec!(68000));
        s.stop_loss = Some(dec!(70000));
        s.take_profit = Some(dec!(64000));
        let (risk, reward) = s.risk_reward().unwrap();
        assert_eq!(risk, dec!(2000));
        assert_eq!(reward, dec!(4000));
    }

    #[test]
    fn test_serde_round_trip() {
        let s = signal();
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"direction\":\"long\""));
        assert!(json.contains("\"signal_type\":\"entry\""));
        let back: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
