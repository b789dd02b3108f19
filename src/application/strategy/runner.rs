use crate::application::strategy::strategies::Strategy;
use crate::application::strategy::{IndicatorDag, MarketContextProvider, MitigationEngine};
use crate::domain::constants::{cache_keys, exchanges, queues, routing, ttl};
use crate::domain::indicators::IndicatorType;
use crate::domain::market::{Candle, CandleEvent, CandleSource, LastUpdated, Timeframe};
use crate::domain::trading::Signal;
use crate::infrastructure::bus::{publish_json, Delivery, MessageBus, MessageHandler};
use crate::infrastructure::cache::{get_json, set_json, Cache};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Bar-driven strategy engine. Consumes `candle.new.#`, loads fresh
/// candles from the cache, refreshes market context, runs the indicator
/// DAG and the mitigation pass, and publishes validated strategy signals.
///
/// Bar events are handed off the bus dispatcher onto per
/// `(symbol, timeframe)` serial workers: different markets analyze in
/// parallel, one market never analyzes out of order.
pub struct StrategyRunner {
    strategies: Vec<Arc<dyn Strategy>>,
    cache: Arc<dyn Cache>,
    bus: Arc<dyn MessageBus>,
    context_provider: Arc<dyn MarketContextProvider>,
    dag: Arc<IndicatorDag>,
    mitigation: Arc<MitigationEngine>,
    workers: Mutex<HashMap<(String, Timeframe), mpsc::UnboundedSender<CandleEvent>>>,
}

impl StrategyRunner {
    pub fn new(
        strategies: Vec<Arc<dyn Strategy>>,
        cache: Arc<dyn Cache>,
        bus: Arc<dyn MessageBus>,
        context_provider: Arc<dyn MarketContextProvider>,
        dag: IndicatorDag,
        mitigation: MitigationEngine,
    ) -> Self {
        Self {
            strategies,
            cache,
            bus,
            context_provider,
            dag: Arc::new(dag),
            mitigation: Arc::new(mitigation),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting strategy runner...");

        self.bus.declare_exchange(exchanges::STRATEGY).await?;
        self.bus
            .bind_queue(exchanges::MARKET_DATA, queues::CANDLES, routing::CANDLE_ALL)
            .await?;

        // Fail fast on a bad registration graph before consuming anything.
        self.dag
            .compute_execution_order()
            .context("indicator graph is invalid")?;

        self.bus
            .subscribe(
                queues::CANDLES,
                Arc::new(CandleEventHandler {
                    runner: Arc::clone(self),
                }),
            )
            .await?;

        info!("Strategy runner started");
        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping strategy runner...");
        self.workers.lock().await.clear();
        self.bus.stop().await;
        info!("Strategy runner stopped");
    }

    /// Route a bar event onto its market's serial worker, spawning the
    /// worker on first sight of the market.
    async fn dispatch(self: &Arc<Self>, event: CandleEvent) {
        let key = (event.candle.symbol.clone(), event.candle.timeframe);
        let mut workers = self.workers.lock().await;
        let sender = workers.entry(key.clone()).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<CandleEvent>();
            let runner = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Err(e) = runner.process_bar(event).await {
                        error!("Error in event-based strategy execution: {:#}", e);
                    }
                }
            });
            tx
        });
        if sender.send(event).is_err() {
            warn!("Worker for {:?} is gone, dropping bar event", key);
        }
    }

    #[instrument(skip(self, event), fields(symbol = %event.candle.symbol, timeframe = %event.candle.timeframe))]
    async fn process_bar(&self, event: CandleEvent) -> Result<()> {
        let exchange = event.candle.exchange.clone();
        let symbol = event.candle.symbol.clone();
        let timeframe = event.candle.timeframe;
        let source = event.source;

        // 1. Fresh candles since the last processed timestamp.
        let candles = self
            .fetch_new_candles(&exchange, &symbol, timeframe, source)
            .await;
        if candles.is_empty() {
            debug!("No new candles for {} {} from {:?}", symbol, timeframe, source);
            return Ok(());
        }
        let latest_timestamp = candles
            .last()
            .expect("non-empty candle batch")
            .timestamp;

        // 2. Refresh this timeframe's market context.
        self.context_provider
            .update_context(&exchange, &symbol, timeframe, &candles)
            .await?;

        // 3. The MTF gate: no signals from an incomplete picture.
        let Some(contexts) = self
            .context_provider
            .multi_timeframe_contexts(&exchange, &symbol, timeframe)
            .await?
        else {
            info!(
                "Incomplete MTF context for {} {}. Skipping strategy execution.",
                symbol, timeframe
            );
            return Ok(());
        };

        // 4. Union of the indicators any strategy needs.
        let required: Vec<IndicatorType> = self
            .strategies
            .iter()
            .flat_map(|s| s.required_indicators())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        // 5. Run the DAG.
        let results = self.dag.run(&candles, &contexts, Some(&required)).await?;

        // 6. Mitigation is fire-and-inspect: failures are logged per type
        //    inside the engine and never block signal generation.
        self.mitigation.process(&candles).await;

        // 7. Strategies applicable to this timeframe.
        for strategy in &self.strategies {
            if !strategy.timeframes().contains(&timeframe) {
                continue;
            }
            let signals = strategy.analyze(&results).await;
            for mut signal in signals {
                if strategy.validate(&mut signal) {
                    if let Err(e) = self.publish_signal(&signal).await {
                        error!("Error publishing signal {}: {:#}", signal.id, e);
                    } else {
                        info!(
                            "Generated signal from {} for {} ({})",
                            strategy.name(),
                            symbol,
                            timeframe
                        );
                    }
                }
            }
        }

        // 8. Advance the high-water mark.
        let last_updated_key = cache_keys::candle_last_updated(&exchange, &symbol, timeframe);
        set_json(
            self.cache.as_ref(),
            &last_updated_key,
            &LastUpdated {
                timestamp: latest_timestamp,
                source,
            },
            None,
        )
        .await;

        Ok(())
    }

    /// Members of the source-appropriate sorted set scored strictly after
    /// the persisted high-water mark, oldest first.
    async fn fetch_new_candles(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        source: CandleSource,
    ) -> Vec<Candle> {
        let set_key = match source {
            CandleSource::Historical => cache_keys::historical_candles(exchange, symbol, timeframe),
            CandleSource::Live => cache_keys::live_candles(exchange, symbol, timeframe),
        };

        let last_updated_key = cache_keys::candle_last_updated(exchange, symbol, timeframe);
        let min_score = match get_json::<LastUpdated>(self.cache.as_ref(), &last_updated_key).await
        {
            Some(last) => last.timestamp.timestamp_millis() as f64 + 1.0,
            None => f64::NEG_INFINITY,
        };

        let members = self
            .cache
            .get_from_sorted_set_by_score(&set_key, min_score, f64::INFINITY)
            .await;

        let mut candles: Vec<Candle> = members
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(candle) => Some(candle),
                Err(e) => {
                    warn!("Failed to decode candle JSON: {}", e);
                    None
                }
            })
            .collect();
        candles.sort_by_key(|c: &Candle| c.timestamp);
        candles
    }

    async fn publish_signal(&self, signal: &Signal) -> Result<()> {
        let routing_key = routing::signal_detected(&signal.exchange, &signal.symbol, signal.timeframe);
        publish_json(self.bus.as_ref(), exchanges::STRATEGY, &routing_key, signal)
            .await
            .context("failed to publish signal")?;

        let signal_key = cache_keys::signal(&signal.exchange, &signal.symbol, &signal.id);
        set_json(
            self.cache.as_ref(),
            &signal_key,
            signal,
            Some(ttl::SIGNAL_DATA),
        )
        .await;

        let active_key = cache_keys::active_signals(&signal.exchange, &signal.symbol);
        let payload = serde_json::to_string(signal)?;
        self.cache.hash_set(&active_key, &signal.id, payload).await;

        info!(
            "Published signal: {} ({} for {})",
            signal.id, signal.strategy_name, signal.symbol
        );
        Ok(())
    }
}

struct CandleEventHandler {
    runner: Arc<StrategyRunner>,
}

#[async_trait]
impl MessageHandler for CandleEventHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        // Malformed payloads are rejected without requeue.
        let event: CandleEvent = match delivery.decode() {
            Ok(event) => event,
            Err(e) => {
                error!("Rejecting undecodable candle event: {}", e);
                return Ok(());
            }
        };
        debug!(
            "Received candle event: {} {}",
            event.candle.symbol, event.candle.timeframe
        );
        self.runner.dispatch(event).await;
        Ok(())
    }
}
