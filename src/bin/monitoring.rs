//! Monitoring service: consumes order events, raises operator alerts and
//! maintains live order/position views.

use anyhow::Result;
use obtrade::application::monitoring::{MonitoringService, OrderTracker};
use obtrade::config::Config;
use obtrade::infrastructure::alert::{AlertManager, AlertSink, TelegramSink, TracingSink};
use obtrade::infrastructure::bus::{InProcessBus, MessageBus};
use obtrade::infrastructure::cache::{Cache, InMemoryCache, RedisCache};
use obtrade::infrastructure::persistence::{Database, SqlitePositionRepository};
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
        "obtrade monitoring service {} starting...",
        env!("CARGO_PKG_VERSION")
    );
    let config = Config::load()?;

    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(uri) => Arc::new(RedisCache::connect(uri)?),
        None => Arc::new(InMemoryCache::new()),
    };

    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(TracingSink)];
    match &config.telegram {
        Some(telegram) => {
            info!("Telegram alert sink enabled");
            sinks.push(Arc::new(TelegramSink::new(
                telegram.bot_token.clone(),
                telegram.chat_id.clone(),
            )));
        }
        None => info!("Alert manager initialized without Telegram (not configured)"),
    }

    let database = Database::new(&config.database_url).await?;
    let positions = Arc::new(SqlitePositionRepository::new(database.pool.clone()));
    let tracker = Arc::new(OrderTracker::new(cache, positions));

    // Warm the live-orders view for the configured markets.
    for symbol in &config.symbols {
        tracker.load_active_orders(&config.exchange, symbol).await;
    }

    let service = Arc::new(MonitoringService::new(
        bus,
        Arc::new(AlertManager::new(sinks)),
        tracker,
    ));

    service.start().await?;
    info!("Monitoring service running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    service.stop().await;

    Ok(())
}
