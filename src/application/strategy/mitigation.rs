use crate::application::strategy::indicators::Indicator;
use crate::domain::indicators::IndicatorType;
use crate::domain::market::Candle;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Per-type outcome of a mitigation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MitigationReport {
    pub processed: usize,
    pub updated: usize,
    pub mitigated: usize,
    pub still_valid: usize,
    pub error: Option<String>,
}

/// Reconciles persisted active indicator instances against recent price
/// action. Runs after the DAG on every bar; only indicator kinds flagged
/// `requires_mitigation` participate, and a failure in one kind never
/// aborts the others.
pub struct MitigationEngine {
    indicators: HashMap<IndicatorType, Arc<dyn Indicator>>,
}

impl MitigationEngine {
    pub fn new() -> Self {
        Self {
            indicators: HashMap::new(),
        }
    }

    pub fn register(&mut self, indicator: Arc<dyn Indicator>) {
        let indicator_type = indicator.indicator_type();
        if indicator_type.requires_mitigation() {
            info!("Registered indicator '{}' for mitigation processing", indicator_type);
            self.indicators.insert(indicator_type, indicator);
        } else {
            debug!(
                "Indicator '{}' does not require mitigation, skipping registration",
                indicator_type
            );
        }
    }

    pub fn registered_count(&self) -> usize {
        self.indicators.len()
    }

    pub async fn process(&self, candles: &[Candle]) -> HashMap<IndicatorType, MitigationReport> {
        let mut reports = HashMap::new();

        let Some(first) = candles.first() else {
            info!("No candles passed into mitigation processing");
            return reports;
        };
        let exchange = &first.exchange;
        let symbol = &first.symbol;
        let timeframe = first.timeframe;

        for (&indicator_type, indicator) in &self.indicators {
            let report = self
                .process_one(indicator.as_ref(), exchange, symbol, timeframe, candles)
                .await;
            match &report.error {
                None => info!(
                    "Processed {} {} instances for {} {}: {} still valid, {} mitigated",
                    report.processed, indicator_type, symbol, timeframe,
                    report.still_valid, report.mitigated
                ),
                Some(e) => error!(
                    "Error processing mitigation for {}: {}",
                    indicator_type, e
                ),
            }
            reports.insert(indicator_type, report);
        }

        reports
    }

    async fn process_one(
        &self,
        indicator: &dyn Indicator,
        exchange: &str,
        symbol: &str,
        timeframe: crate::domain::market::Timeframe,
        candles: &[Candle],
    ) -> MitigationReport {
        let Some(repository) = indicator.repository() else {
            return MitigationReport {
                error: Some("indicator has no repository".to_string()),
                ..Default::default()
            };
        };

        let (min_price, max_price) = indicator.relevant_price_range(candles);

        let instances = match repository
            .find_active_in_price_range(exchange, symbol, min_price, max_price, &[timeframe])
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                return MitigationReport {
                    error: Some(format!("{:#}", e)),
                    ..Default::default()
                }
            }
        };

        if instances.is_empty() {
            return MitigationReport::default();
        }

        let processed = instances.len();
        let (updated_instances, still_valid) =
            indicator.process_existing(instances, candles).await;

        let mut updated = 0;
        for instance in &updated_instances {
            match repository.update_indicator_status(instance).await {
                Ok(true) => updated += 1,
                Ok(false) => debug!("Instance {} no longer present, skipping update", instance.id),
                Err(e) => error!("Failed to update instance {}: {:#}", instance.id, e),
            }
        }

        MitigationReport {
            processed,
            updated,
            mitigated: processed - still_valid.len(),
            still_valid: still_valid.len(),
            error: None,
        }
    }
}

impl Default for MitigationEngine {
    fn default() -> Self {
        Self::new()
    }
}
