//! Configuration: a TOML file (optional, `OBTRADE_CONFIG`) overlaid by
//! environment variables. Each service binary loads the same aggregate
//! and picks the sections it needs.

use crate::application::execution::RiskSettings;
use crate::application::strategy::indicators::OrderBlockParams;
use crate::application::strategy::strategies::OrderBlockStrategyParams;
use crate::domain::market::Timeframe;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    exchange: Option<String>,
    symbols: Option<Vec<String>>,
    base_timeframe: Option<String>,
    custom_timeframes: Option<Vec<String>>,
    database_url: Option<String>,
    redis_url: Option<String>,
    #[serde(default)]
    risk: FileRiskConfig,
    #[serde(default)]
    strategy: FileStrategyConfig,
    #[serde(default)]
    telegram: Option<FileTelegramConfig>,
    #[serde(default)]
    venue: Option<FileVenueConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileRiskConfig {
    risk_per_trade: Option<Decimal>,
    max_position_size: Option<Decimal>,
    leverage: Option<u32>,
    fallback_equity: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStrategyConfig {
    risk_reward_ratio: Option<Decimal>,
    min_risk_reward_ratio: Option<Decimal>,
    strength_threshold: Option<Decimal>,
    stop_loss_pct: Option<Decimal>,
    entry_buffer_pct: Option<Decimal>,
    mitigation_threshold: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileTelegramConfig {
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FileVenueConfig {
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Aggregate configuration for all services.
#[derive(Debug, Clone)]
pub struct Config {
    pub exchange: String,
    pub symbols: Vec<String>,
    pub base_timeframe: Timeframe,
    pub custom_timeframes: Vec<Timeframe>,
    pub database_url: String,
    /// Redis connection string; `None` selects the in-memory cache.
    pub redis_url: Option<String>,
    pub risk: RiskSettings,
    pub strategy: OrderBlockStrategyParams,
    pub order_block: OrderBlockParams,
    pub telegram: Option<TelegramConfig>,
    pub venue: Option<VenueConfig>,
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_timeframes(raw: &[String]) -> Result<Vec<Timeframe>> {
    raw.iter()
        .map(|s| Timeframe::from_str(s))
        .collect::<Result<Vec<_>>>()
}

impl Config {
    /// Load the optional TOML file named by `OBTRADE_CONFIG`, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let file: FileConfig = match env_var("OBTRADE_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path))?;
                toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path))?
            }
            None => FileConfig::default(),
        };

        let exchange = env_var("EXCHANGE")
            .or(file.exchange)
            .unwrap_or_else(|| "hyperliquid".to_string());

        let symbols = match env_var("SYMBOLS") {
            Some(raw) => raw.split(',').map(|s| s.trim().to_string()).collect(),
            None => file
                .symbols
                .unwrap_or_else(|| vec!["BTC-USD".to_string()]),
        };

        let base_timeframe = match env_var("BASE_TIMEFRAME") {
            Some(raw) => Timeframe::from_str(&raw)?,
            None => file
                .base_timeframe
                .as_deref()
                .map(Timeframe::from_str)
                .transpose()?
                .unwrap_or(Timeframe::FifteenMin),
        };

        let custom_timeframes = match env_var("CUSTOM_TIMEFRAMES") {
            Some(raw) => parse_timeframes(
                &raw.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>(),
            )?,
            None => match file.custom_timeframes {
                Some(raw) => parse_timeframes(&raw)?,
                None => vec![Timeframe::OneHour, Timeframe::FourHour],
            },
        };

        let database_url = env_var("DATABASE_URL")
            .or(file.database_url)
            .unwrap_or_else(|| "sqlite://data/obtrade.db".to_string());

        let redis_url = env_var("REDIS_URL").or(file.redis_url);

        let mut risk = RiskSettings::default();
        if let Some(v) = file.risk.risk_per_trade {
            risk.risk_per_trade = v;
        }
        if let Some(v) = file.risk.max_position_size {
            risk.max_position_size = v;
        }
        if let Some(v) = file.risk.leverage {
            risk.leverage = v;
        }
        if let Some(v) = file.risk.fallback_equity {
            risk.fallback_equity = v;
        }
        if let Some(raw) = env_var("RISK_PER_TRADE") {
            risk.risk_per_trade = Decimal::from_str(&raw).context("Invalid RISK_PER_TRADE")?;
        }
        if let Some(raw) = env_var("MAX_POSITION_SIZE") {
            risk.max_position_size =
                Decimal::from_str(&raw).context("Invalid MAX_POSITION_SIZE")?;
        }

        let mut strategy = OrderBlockStrategyParams::default();
        if let Some(v) = file.strategy.risk_reward_ratio {
            strategy.risk_reward_ratio = v;
        }
        if let Some(v) = file.strategy.min_risk_reward_ratio {
            strategy.min_risk_reward_ratio = v;
        }
        if let Some(v) = file.strategy.strength_threshold {
            strategy.strength_threshold = v;
        }
        if let Some(v) = file.strategy.stop_loss_pct {
            strategy.stop_loss_pct = v;
        }
        if let Some(v) = file.strategy.entry_buffer_pct {
            strategy.entry_buffer_pct = v;
        }

        let mut order_block = OrderBlockParams::default();
        if let Some(v) = file.strategy.mitigation_threshold {
            order_block.mitigation_threshold = v;
        }
        if let Some(raw) = env_var("MITIGATION_THRESHOLD") {
            order_block.mitigation_threshold =
                Decimal::from_str(&raw).context("Invalid MITIGATION_THRESHOLD")?;
        }

        let telegram = match (env_var("TELEGRAM_BOT_TOKEN"), env_var("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => file.telegram.map(|t| TelegramConfig {
                bot_token: t.bot_token,
                chat_id: t.chat_id,
            }),
        };

        let venue = match file.venue {
            Some(v) => Some(VenueConfig {
                base_url: env_var("VENUE_BASE_URL").unwrap_or(v.base_url),
                api_key: env_var("VENUE_API_KEY")
                    .or(v.api_key)
                    .unwrap_or_default(),
                api_secret: env_var("VENUE_API_SECRET")
                    .or(v.api_secret)
                    .unwrap_or_default(),
            }),
            None => env_var("VENUE_BASE_URL").map(|base_url| VenueConfig {
                base_url,
                api_key: env_var("VENUE_API_KEY").unwrap_or_default(),
                api_secret: env_var("VENUE_API_SECRET").unwrap_or_default(),
            }),
        };

        Ok(Config {
            exchange,
            symbols,
            base_timeframe,
            custom_timeframes,
            database_url,
            redis_url,
            risk,
            strategy,
            order_block,
            telegram,
            venue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_sections_parse() {
        let raw = r#"
            exchange = "hyperliquid"
            symbols = ["BTC-USD", "ETH-USD"]
            base_timeframe = "15m"
            custom_timeframes = ["1h", "4h"]

            [risk]
            risk_per_trade = 0.02
            max_position_size = 0.5

            [strategy]
            strength_threshold = 0.6
            mitigation_threshold = 90

            [telegram]
            bot_token = "token"
            chat_id = "chat"
        "#;
        let file: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(file.exchange.as_deref(), Some("hyperliquid"));
        assert_eq!(file.symbols.as_ref().unwrap().len(), 2);
        assert!(file.risk.risk_per_trade.is_some());
        assert_eq!(file.strategy.mitigation_threshold, Some(Decimal::from(90)));
        assert!(file.telegram.is_some());
    }

    #[test]
    fn test_timeframe_list_parsing() {
        let parsed =
            parse_timeframes(&["1h".to_string(), "4h".to_string()]).unwrap();
        assert_eq!(parsed, vec![Timeframe::OneHour, Timeframe::FourHour]);
        assert!(parse_timeframes(&["7x".to_string()]).is_err());
    }
}
