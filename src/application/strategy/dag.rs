use crate::application::strategy::indicators::{Indicator, IndicatorData, IndicatorOutcome};
use crate::domain::errors::IndicatorError;
use crate::domain::indicators::IndicatorType;
use crate::domain::market::{Candle, MarketContext};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Results of one per-bar DAG execution.
#[derive(Debug, Clone)]
pub struct DagRun {
    pub outcomes: HashMap<IndicatorType, IndicatorOutcome>,
    pub market_contexts: Vec<MarketContext>,
    pub current_price: Decimal,
}

impl DagRun {
    pub fn outcome(&self, indicator_type: IndicatorType) -> Option<&IndicatorOutcome> {
        self.outcomes.get(&indicator_type)
    }
}

/// Dependency-aware indicator executor. Registration order is irrelevant;
/// a depth-first topological sort fixes the execution order, memoized
/// until the next registration.
pub struct IndicatorDag {
    indicators: HashMap<IndicatorType, Arc<dyn Indicator>>,
    dependencies: HashMap<IndicatorType, Vec<IndicatorType>>,
    execution_order: Mutex<Option<Vec<IndicatorType>>>,
}

impl IndicatorDag {
    pub fn new() -> Self {
        Self {
            indicators: HashMap::new(),
            dependencies: HashMap::new(),
            execution_order: Mutex::new(None),
        }
    }

    pub fn register(
        &mut self,
        indicator_type: IndicatorType,
        indicator: Arc<dyn Indicator>,
        dependencies: Vec<IndicatorType>,
    ) {
        debug!(
            "Registered indicator '{}' with dependencies: {:?}",
            indicator_type, dependencies
        );
        self.indicators.insert(indicator_type, indicator);
        self.dependencies.insert(indicator_type, dependencies);
        *self.execution_order.lock().expect("order lock") = None;
    }

    pub fn is_registered(&self, indicator_type: IndicatorType) -> bool {
        self.indicators.contains_key(&indicator_type)
    }

    /// Topological order over the registered graph. Cycles are rejected
    /// before anything runs.
    pub fn compute_execution_order(&self) -> Result<Vec<IndicatorType>, IndicatorError> {
        if let Some(order) = self.execution_order.lock().expect("order lock").clone() {
            return Ok(order);
        }

        let mut visited: HashSet<IndicatorType> = HashSet::new();
        let mut on_stack: HashSet<IndicatorType> = HashSet::new();
        let mut order = Vec::new();

        fn visit(
            node: IndicatorType,
            indicators: &HashMap<IndicatorType, Arc<dyn Indicator>>,
            dependencies: &HashMap<IndicatorType, Vec<IndicatorType>>,
            visited: &mut HashSet<IndicatorType>,
            on_stack: &mut HashSet<IndicatorType>,
            order: &mut Vec<IndicatorType>,
        ) -> Result<(), IndicatorError> {
            if on_stack.contains(&node) {
                return Err(IndicatorError::CyclicDependency(node.to_string()));
            }
            if visited.contains(&node) {
                return Ok(());
            }
            on_stack.insert(node);
            for dep in dependencies.get(&node).into_iter().flatten() {
                if !indicators.contains_key(dep) {
                    warn!("Dependency '{}' for indicator '{}' not found", dep, node);
                    continue;
                }
                visit(*dep, indicators, dependencies, visited, on_stack, order)?;
            }
            on_stack.remove(&node);
            visited.insert(node);
            order.push(node);
            Ok(())
        }

        let mut nodes: Vec<IndicatorType> = self.indicators.keys().copied().collect();
        nodes.sort_by_key(|t| t.stable_id());
        for node in nodes {
            visit(
                node,
                &self.indicators,
                &self.dependencies,
                &mut visited,
                &mut on_stack,
                &mut order,
            )?;
        }

        info!("Computed indicator execution order: {:?}", order);
        *self.execution_order.lock().expect("order lock") = Some(order.clone());
        Ok(order)
    }

    /// Run the requested indicators (all registered when `None`) plus the
    /// transitive closure of their dependencies, in topological order.
    /// A single indicator failure is isolated as a `Failed` outcome.
    pub async fn run(
        &self,
        candles: &[Candle],
        market_contexts: &[MarketContext],
        requested: Option<&[IndicatorType]>,
    ) -> Result<DagRun, IndicatorError> {
        let execution_order = self.compute_execution_order()?;

        let required: Option<HashSet<IndicatorType>> = requested.map(|requested| {
            let mut required: HashSet<IndicatorType> = requested.iter().copied().collect();
            let mut pending: Vec<IndicatorType> = requested.to_vec();
            while let Some(node) = pending.pop() {
                for dep in self.dependencies.get(&node).into_iter().flatten() {
                    if required.insert(*dep) {
                        pending.push(*dep);
                    }
                }
            }
            required
        });

        let mut data = IndicatorData::new(candles.to_vec(), market_contexts.to_vec())?;
        let current_price = data.current_price;

        for indicator_type in execution_order {
            if let Some(required) = &required {
                if !required.contains(&indicator_type) {
                    continue;
                }
            }
            let indicator = self
                .indicators
                .get(&indicator_type)
                .expect("execution order only contains registered nodes");

            let outcome = match indicator.calculate(&data).await {
                Ok(outcome) => {
                    debug!("Executed indicator '{}'", indicator_type);
                    outcome
                }
                Err(e) => {
                    error!("Error executing indicator '{}': {:#}", indicator_type, e);
                    IndicatorOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            data.store_result(indicator_type, outcome);
        }

        Ok(DagRun {
            outcomes: data.into_results(),
            market_contexts: market_contexts.to_vec(),
            current_price,
        })
    }
}

impl Default for IndicatorDag {
    fn default() -> Self {
        Self::new()
    }
}
