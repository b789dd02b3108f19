use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Candle intervals supported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    FourHour,
    OneDay,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::ThirtyMin => 30,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    pub fn to_millis(&self) -> i64 {
        self.to_minutes() * 60_000
    }

    /// Wire representation, used in routing keys and cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::ThirtyMin => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        }
    }

    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::ThirtyMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
        ]
    }
}

/// Higher timeframes consulted for multi-timeframe confluence, keyed by the
/// analysis timeframe. The first entry is the timeframe itself.
pub fn timeframe_hierarchy(timeframe: Timeframe) -> Vec<Timeframe> {
    match timeframe {
        Timeframe::OneMin => vec![Timeframe::OneMin, Timeframe::FifteenMin, Timeframe::OneHour],
        Timeframe::FiveMin => vec![Timeframe::FiveMin, Timeframe::FifteenMin, Timeframe::OneHour],
        Timeframe::FifteenMin => vec![
            Timeframe::FifteenMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
        ],
        Timeframe::ThirtyMin => vec![Timeframe::ThirtyMin, Timeframe::FourHour, Timeframe::OneDay],
        Timeframe::OneHour => vec![Timeframe::OneHour, Timeframe::FourHour, Timeframe::OneDay],
        Timeframe::FourHour => vec![Timeframe::FourHour, Timeframe::OneDay],
        Timeframe::OneDay => vec![Timeframe::OneDay],
    }
}

/// Bucket boundaries for aggregating a base bar into `timeframe`.
///
/// Buckets are half-open `[start, end)` and aligned to the epoch. Base bars
/// on the aggregation stream are close-stamped, so a timestamp lying exactly
/// on a period boundary belongs to the bucket it closes, not the one it
/// would open.
pub fn calculate_candle_boundaries(
    timestamp: DateTime<Utc>,
    timeframe: Timeframe,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let period = timeframe.to_millis();
    let ts = timestamp.timestamp_millis();
    let start = (ts - 1).div_euclid(period) * period;
    let end = start + period;
    (
        Utc.timestamp_millis_opt(start).unwrap(),
        Utc.timestamp_millis_opt(end).unwrap(),
    )
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::OneMin),
            "5m" | "5min" => Ok(Timeframe::FiveMin),
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "30m" | "30min" => Ok(Timeframe::ThirtyMin),
            "1h" | "1hour" => Ok(Timeframe::OneHour),
            "4h" | "4hour" => Ok(Timeframe::FourHour),
            "1d" | "1day" => Ok(Timeframe::OneDay),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 1m, 5m, 15m, 30m, 1h, 4h, 1d",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timeframe::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Timeframe::from_str("1h").unwrap(), Timeframe::OneHour);
        assert_eq!(Timeframe::from_str("15M").unwrap(), Timeframe::FifteenMin);
        assert!(Timeframe::from_str("7m").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&Timeframe::FourHour).unwrap();
        assert_eq!(json, "\"4h\"");
        let back: Timeframe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Timeframe::FourHour);
    }

    #[test]
    fn test_boundaries_mid_bucket() {
        let (start, end) =
            calculate_candle_boundaries(ts("2024-01-01T00:15:00Z"), Timeframe::OneHour);
        assert_eq!(start, ts("2024-01-01T00:00:00Z"));
        assert_eq!(end, ts("2024-01-01T01:00:00Z"));
    }

    #[test]
    fn test_boundary_timestamp_closes_preceding_bucket() {
        // A bar stamped exactly 01:00 closes the [00:00, 01:00) bucket.
        let (start, end) =
            calculate_candle_boundaries(ts("2024-01-01T01:00:00Z"), Timeframe::OneHour);
        assert_eq!(start, ts("2024-01-01T00:00:00Z"));
        assert_eq!(end, ts("2024-01-01T01:00:00Z"));
    }

    #[test]
    fn test_boundaries_contiguous() {
        let (_, end) =
            calculate_candle_boundaries(ts("2024-01-01T03:59:00Z"), Timeframe::FourHour);
        let (next_start, _) = calculate_candle_boundaries(ts("2024-01-01T04:01:00Z"), Timeframe::FourHour);
        assert_eq!(end, next_start);
    }

    #[test]
    fn test_hierarchy_starts_with_self() {
        for tf in Timeframe::all() {
            assert_eq!(timeframe_hierarchy(tf)[0], tf);
        }
    }
}
