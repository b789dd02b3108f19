//! Backtest runner: replays persisted candles through the full pipeline
//! against the paper exchange.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use obtrade::application::backtest::{BacktestConfig, BacktestRunner};
use obtrade::config::Config;
use obtrade::domain::repositories::CandleRepository;
use obtrade::infrastructure::persistence::{Database, SqliteCandleRepository};
use std::str::FromStr;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay historical candles through the pipeline")]
struct Args {
    /// Symbol to replay.
    #[arg(long, default_value = "BTC-USD")]
    symbol: String,

    /// Base timeframe of the stored candles.
    #[arg(long, default_value = "15m")]
    timeframe: String,

    /// Replay window start (RFC 3339).
    #[arg(long)]
    start: Option<String>,

    /// Replay window end (RFC 3339).
    #[arg(long)]
    end: Option<String>,
}

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

    let args = Args::parse();
    let config = Config::load()?;

    let timeframe = obtrade::domain::market::Timeframe::from_str(&args.timeframe)?;
    let start = args
        .start
        .as_deref()
        .map(DateTime::<Utc>::from_str)
        .transpose()?;
    let end = args
        .end
        .as_deref()
        .map(DateTime::<Utc>::from_str)
        .transpose()?;

    let database = Database::new(&config.database_url).await?;
    let repository = SqliteCandleRepository::new(database.pool.clone());
    let candles = repository
        .find_by(&config.exchange, &args.symbol, timeframe, start, end, None)
        .await?;

    if candles.is_empty() {
        info!(
            "No candles stored for {} {} {}; nothing to replay",
            config.exchange, args.symbol, timeframe
        );
        return Ok(());
    }

    let runner = BacktestRunner::new(BacktestConfig {
        exchange_id: config.exchange.clone(),
        custom_timeframes: config.custom_timeframes.clone(),
        risk: config.risk.clone(),
        strategy: config.strategy.clone(),
        order_block: config.order_block.clone(),
        ..BacktestConfig::default()
    });

    let report = runner.run(candles).await?;
    info!(
        "Backtest report: {} bars replayed, {} open orders, {} alerts",
        report.bars_replayed, report.orders_open, report.alerts
    );

    Ok(())
}
