use crate::domain::market::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An OHLCV bar. Identity is `(exchange, symbol, timeframe, timestamp)`;
/// a candle is immutable once `is_closed` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub is_closed: bool,
}

impl Candle {
    /// Fold a newer base bar into this partial bar. Open and timestamp are
    /// fixed at creation; high/low extend, close tracks the latest bar,
    /// volume accumulates.
    pub fn merge(&self, newer: &Candle) -> Candle {
        Candle {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            timestamp: self.timestamp,
            open: self.open,
            high: self.high.max(newer.high),
            low: self.low.min(newer.low),
            close: newer.close,
            volume: self.volume + newer.volume,
            is_closed: self.is_closed,
        }
    }

    /// Epoch-millisecond score used in the cache sorted sets.
    pub fn score(&self) -> f64 {
        self.timestamp.timestamp_millis() as f64
    }

    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Origin of a candle event: REST backfill or websocket stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleSource {
    #[default]
    Live,
    Historical,
}

/// Payload published on `candle.new.*` and `external.new.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleEvent {
    #[serde(flatten)]
    pub candle: Candle,
    #[serde(default)]
    pub source: CandleSource,
}

/// Value stored under `candle:last_updated:{...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastUpdated {
    pub timestamp: DateTime<Utc>,
    pub source: CandleSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Candle {
        Candle {
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::FifteenMin,
            timestamp: "2024-01-01T00:15:00Z".parse().unwrap(),
            open,
            high,
            low,
            close,
            volume,
            is_closed: true,
        }
    }

    #[test]
    fn test_merge_rule() {
        let first = candle(dec!(1), dec!(3), dec!(1), dec!(2), dec!(10));
        let second = candle(dec!(2), dec!(4), dec!(2), dec!(3), dec!(20));
        let third = candle(dec!(3), dec!(3), dec!(0.5), dec!(2.5), dec!(30));

        let merged = first.merge(&second).merge(&third);
        assert_eq!(merged.open, dec!(1));
        assert_eq!(merged.high, dec!(4));
        assert_eq!(merged.low, dec!(0.5));
        assert_eq!(merged.close, dec!(2.5));
        assert_eq!(merged.volume, dec!(60));
    }

    #[test]
    fn test_json_round_trip_ignores_unknown_fields() {
        let c = candle(dec!(1), dec!(3), dec!(1), dec!(2), dec!(10));
        let mut value = serde_json::to_value(&c).unwrap();
        value["extra_field"] = serde_json::json!("ignored");
        let back: Candle = serde_json::from_value(value).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_timestamp_serializes_rfc3339_utc() {
        let c = candle(dec!(1), dec!(3), dec!(1), dec!(2), dec!(10));
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("2024-01-01T00:15:00Z"));
    }

    #[test]
    fn test_event_source_defaults_to_live() {
        let c = candle(dec!(1), dec!(3), dec!(1), dec!(2), dec!(10));
        let json = serde_json::to_string(&c).unwrap();
        let event: CandleEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.source, CandleSource::Live);
    }
}
