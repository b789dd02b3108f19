//! Strategy service: consumes candle events, runs the indicator DAG and
//! the mitigation pass, and publishes validated signals.

use anyhow::Result;
use obtrade::application::strategy::indicators::{
    DojiIndicator, FvgIndicator, HiddenOrderBlockIndicator, OrderBlockIndicator,
    StructureBreakIndicator,
};
use obtrade::application::strategy::strategies::{OrderBlockStrategy, Strategy};
use obtrade::application::strategy::{
    CacheContextProvider, IndicatorDag, MitigationEngine, StrategyRunner,
};
use obtrade::config::Config;
use obtrade::domain::indicators::IndicatorType;
use obtrade::infrastructure::bus::{InProcessBus, MessageBus};
use obtrade::infrastructure::cache::{Cache, InMemoryCache, RedisCache};
use obtrade::infrastructure::persistence::{Database, SqliteIndicatorRepository};
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
        "obtrade strategy service {} starting...",
        env!("CARGO_PKG_VERSION")
    );
    let config = Config::load()?;

    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(uri) => Arc::new(RedisCache::connect(uri)?),
        None => Arc::new(InMemoryCache::new()),
    };

    let database = Database::new(&config.database_url).await?;
    let indicator_repo = Arc::new(SqliteIndicatorRepository::new(database.pool.clone()));

    let mut dag = IndicatorDag::new();
    dag.register(IndicatorType::Fvg, Arc::new(FvgIndicator::default()), vec![]);
    dag.register(
        IndicatorType::DojiCandle,
        Arc::new(DojiIndicator::default()),
        vec![],
    );
    dag.register(
        IndicatorType::StructureBreak,
        Arc::new(StructureBreakIndicator::default()),
        vec![],
    );
    let order_block = Arc::new(OrderBlockIndicator::new(
        config.order_block.clone(),
        indicator_repo.clone(),
    ));
    dag.register(
        IndicatorType::OrderBlock,
        order_block.clone(),
        vec![
            IndicatorType::StructureBreak,
            IndicatorType::Fvg,
            IndicatorType::DojiCandle,
        ],
    );

    dag.register(
        IndicatorType::HiddenOrderBlock,
        Arc::new(HiddenOrderBlockIndicator::default()),
        vec![IndicatorType::OrderBlock, IndicatorType::Fvg],
    );

    let mut mitigation = MitigationEngine::new();
    mitigation.register(order_block);

    let strategies: Vec<Arc<dyn Strategy>> = vec![Arc::new(OrderBlockStrategy::new(
        config.strategy.clone(),
        indicator_repo,
    ))];

    let runner = Arc::new(StrategyRunner::new(
        strategies,
        cache.clone(),
        bus,
        Arc::new(CacheContextProvider::new(cache)),
        dag,
        mitigation,
    ));

    runner.start().await?;
    info!("Strategy service running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    runner.stop().await;

    Ok(())
}
