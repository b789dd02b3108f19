//! Data service: consumes base candles from ingestion, persists and
//! caches them, and rolls custom timeframes.

use anyhow::Result;
use obtrade::application::market_data::{CandleAggregator, DataService, StateManager};
use obtrade::config::Config;
use obtrade::domain::repositories::CandleRepository;
use obtrade::infrastructure::bus::{InProcessBus, MessageBus};
use obtrade::infrastructure::cache::{Cache, InMemoryCache, RedisCache};
use obtrade::infrastructure::persistence::{Database, SqliteCandleRepository};
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

    info!("obtrade data service {} starting...", env!("CARGO_PKG_VERSION"));
    let config = Config::load()?;
    info!(
        "Configuration loaded: exchange={}, symbols={:?}, base={}, custom={:?}",
        config.exchange, config.symbols, config.base_timeframe, config.custom_timeframes
    );

    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(uri) => Arc::new(RedisCache::connect(uri)?),
        None => Arc::new(InMemoryCache::new()),
    };

    let database = Database::new(&config.database_url).await?;
    let repository: Arc<dyn CandleRepository> =
        Arc::new(SqliteCandleRepository::new(database.pool.clone()));

    let state = Arc::new(StateManager::new(cache.clone()));
    let aggregator = Arc::new(CandleAggregator::new(state, Arc::clone(&bus)));
    let service = Arc::new(DataService::new(
        bus,
        cache,
        repository,
        aggregator,
        config.custom_timeframes.clone(),
    ));

    service.start().await?;
    info!("Data service running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    service.stop().await;

    Ok(())
}
