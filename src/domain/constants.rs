//! Fixed vocabulary shared by every service: exchange and queue names,
//! routing-key templates and cache-key templates with their TTLs.
//!
//! Routing-key segments are lowercased identifiers; symbols keep their
//! native form (e.g. `BTC-USD`).

/// Topic exchanges declared by the services.
pub mod exchanges {
    pub const MARKET_DATA: &str = "market_data";
    pub const STRATEGY: &str = "strategy";
    pub const EXECUTION: &str = "execution";
    pub const SYSTEM: &str = "system";
}

/// Durable queues.
pub mod queues {
    pub const EXTERNAL_DATA: &str = "external_data";
    pub const CANDLES: &str = "candles_data";
    pub const EVENTS: &str = "data_events";
    pub const SIGNALS: &str = "strategy_signals";
    pub const ORDERS: &str = "execution_orders";
    pub const SYSTEM_EVENTS: &str = "system_events";
}

/// Routing-key templates and bind patterns.
pub mod routing {
    use crate::domain::market::Timeframe;

    pub const CANDLE_ALL: &str = "candle.new.#";
    pub const EXTERNAL_ALL: &str = "external.new.#";
    pub const SIGNAL_ALL: &str = "signal.#";
    pub const ORDER_ALL: &str = "order.#";

    pub fn external_new(exchange: &str, symbol: &str, timeframe: Timeframe) -> String {
        format!("external.new.{}.{}.{}", exchange, symbol, timeframe)
    }

    pub fn candle_new(exchange: &str, symbol: &str, timeframe: Timeframe) -> String {
        format!("candle.new.{}.{}.{}", exchange, symbol, timeframe)
    }

    pub fn signal_detected(exchange: &str, symbol: &str, timeframe: Timeframe) -> String {
        format!(
            "signal.orderblock.detected.{}.{}.{}",
            exchange, symbol, timeframe
        )
    }

    pub fn order_new(exchange: &str, symbol: &str) -> String {
        format!("order.new.{}.{}", exchange, symbol)
    }

    pub fn order_cancelled(exchange: &str, symbol: &str) -> String {
        format!("order.cancelled.{}.{}", exchange, symbol)
    }

    pub fn order_failed(exchange: &str, symbol: &str) -> String {
        format!("order.failed.{}.{}", exchange, symbol)
    }
}

/// Cache key templates. Keys are colon-separated; the shape is part of the
/// wire contract because several services read each other's entries.
pub mod cache_keys {
    use crate::domain::market::Timeframe;
    use chrono::{DateTime, SecondsFormat, Utc};

    pub fn historical_candles(exchange: &str, symbol: &str, timeframe: Timeframe) -> String {
        format!("historical:candle:{}:{}:{}", exchange, symbol, timeframe)
    }

    pub fn live_candles(exchange: &str, symbol: &str, timeframe: Timeframe) -> String {
        format!("live:candle:{}:{}:{}", exchange, symbol, timeframe)
    }

    pub fn candle_last_updated(exchange: &str, symbol: &str, timeframe: Timeframe) -> String {
        format!("candle:last_updated:{}:{}:{}", exchange, symbol, timeframe)
    }

    pub fn partial_candle(
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        bar_end: DateTime<Utc>,
    ) -> String {
        format!(
            "partial:candle:{}:{}:{}:{}",
            exchange,
            symbol,
            timeframe,
            bar_end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    pub fn order_block(exchange: &str, symbol: &str, timeframe: Timeframe, id: &str) -> String {
        format!("ob:{}:{}:{}:{}", exchange, symbol, timeframe, id)
    }

    pub fn order_blocks_active(exchange: &str, symbol: &str) -> String {
        format!("ob:{}:{}:active", exchange, symbol)
    }

    pub fn signal(exchange: &str, symbol: &str, id: &str) -> String {
        format!("signal:{}:{}:{}", exchange, symbol, id)
    }

    pub fn active_signals(exchange: &str, symbol: &str) -> String {
        format!("signals:{}:{}:active", exchange, symbol)
    }

    pub fn order(exchange: &str, symbol: &str, id: &str) -> String {
        format!("order:{}:{}:{}", exchange, symbol, id)
    }

    pub fn active_orders(exchange: &str, symbol: &str) -> String {
        format!("orders:{}:{}:active", exchange, symbol)
    }

    pub fn market_state(exchange: &str, symbol: &str, timeframe: Timeframe) -> String {
        format!("market:{}:{}:{}:state", exchange, symbol, timeframe)
    }
}

/// Time-to-live values, in seconds.
pub mod ttl {
    pub const MINUTE: u64 = 60;
    pub const HOUR: u64 = 60 * MINUTE;
    pub const DAY: u64 = 24 * HOUR;
    pub const WEEK: u64 = 7 * DAY;

    pub const PARTIAL_CANDLE: u64 = DAY;
    pub const SIGNAL_DATA: u64 = WEEK;
    pub const ORDER_DATA: u64 = 30 * DAY;
    pub const MARKET_STATE: u64 = WEEK;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_routing_key_shapes() {
        assert_eq!(
            routing::candle_new("hyperliquid", "BTC-USD", Timeframe::OneHour),
            "candle.new.hyperliquid.BTC-USD.1h"
        );
        assert_eq!(
            routing::signal_detected("hyperliquid", "ETH-USD", Timeframe::FourHour),
            "signal.orderblock.detected.hyperliquid.ETH-USD.4h"
        );
        assert_eq!(
            routing::order_failed("hyperliquid", "BTC-USD"),
            "order.failed.hyperliquid.BTC-USD"
        );
    }

    #[test]
    fn test_partial_candle_key_uses_iso_bar_end() {
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(
            cache_keys::partial_candle("hyperliquid", "BTC-USD", Timeframe::OneHour, end),
            "partial:candle:hyperliquid:BTC-USD:1h:2024-01-01T01:00:00Z"
        );
    }
}
