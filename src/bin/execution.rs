//! Execution service: consumes signals, sizes and submits orders, and
//! publishes order lifecycle events.

use anyhow::Result;
use obtrade::application::execution::ExecutionService;
use obtrade::config::Config;
use obtrade::infrastructure::bus::{InProcessBus, MessageBus};
use obtrade::infrastructure::cache::{Cache, InMemoryCache, RedisCache};
use obtrade::infrastructure::exchange::{
    ExchangeConnector, PaperExchange, RestExchange, RestExchangeConfig,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

fn init_tracing() {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!(
        "obtrade execution service {} starting...",
        env!("CARGO_PKG_VERSION")
    );
    let config = Config::load()?;

    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(uri) => Arc::new(RedisCache::connect(uri)?),
        None => Arc::new(InMemoryCache::new()),
    };

    let exchange: Arc<dyn ExchangeConnector> = match &config.venue {
        Some(venue) => {
            info!("Using REST exchange connector at {}", venue.base_url);
            Arc::new(RestExchange::new(RestExchangeConfig {
                exchange_id: config.exchange.clone(),
                base_url: venue.base_url.clone(),
                api_key: venue.api_key.clone(),
                api_secret: venue.api_secret.clone(),
            }))
        }
        None => {
            info!("No venue configured, using paper exchange");
            Arc::new(PaperExchange::new(config.exchange.clone(), dec!(10000)))
        }
    };

    let service = Arc::new(ExecutionService::new(
        exchange,
        bus,
        cache,
        config.risk.clone(),
    ));

    service.start().await?;
    info!("Execution service running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    service.stop().await;

    Ok(())
}
