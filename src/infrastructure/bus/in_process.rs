use crate::domain::errors::MessagingError;
use crate::infrastructure::bus::{topic_matches, Delivery, MessageBus, MessageHandler};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Messages that keep failing are parked after this many redeliveries,
/// standing in for a dead-letter binding.
const DEFAULT_MAX_REDELIVERIES: u32 = 5;

#[derive(Debug, Clone)]
struct Binding {
    pattern: String,
    queue: String,
}

struct PendingDelivery {
    delivery: Delivery,
    attempts: u32,
}

struct QueueState {
    buffer: Mutex<VecDeque<PendingDelivery>>,
    notify: Notify,
    subscribed: AtomicBool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            subscribed: AtomicBool::new(false),
        }
    }
}

/// Topic broker over tokio primitives. Queues buffer until a subscriber
/// attaches; each queue gets a single dispatcher worker, so handlers are
/// single-threaded per queue. Arrival order per queue preserves publish
/// order, which gives FIFO per routing key.
pub struct InProcessBus {
    exchanges: Mutex<HashMap<String, Vec<Binding>>>,
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    max_redeliveries: u32,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            exchanges: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
        }
    }

    pub fn with_max_redeliveries(mut self, max: u32) -> Self {
        self.max_redeliveries = max;
        self
    }

    async fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        self.queues.lock().await.get(name).cloned()
    }

    /// Number of messages currently buffered on a queue (test hook).
    pub async fn queue_depth(&self, name: &str) -> usize {
        match self.queue(name).await {
            Some(q) => q.buffer.lock().await.len(),
            None => 0,
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), MessagingError> {
        let mut exchanges = self.exchanges.lock().await;
        if !exchanges.contains_key(exchange) {
            exchanges.insert(exchange.to_string(), Vec::new());
            info!("Declared exchange: {}", exchange);
        }
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.lock().await;
        if !queues.contains_key(queue) {
            queues.insert(queue.to_string(), Arc::new(QueueState::new()));
            info!("Declared queue: {}", queue);
        }
        Ok(())
    }

    async fn bind_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), MessagingError> {
        self.declare_exchange(exchange).await?;
        self.declare_queue(queue).await?;

        let mut exchanges = self.exchanges.lock().await;
        let bindings = exchanges.entry(exchange.to_string()).or_default();
        let exists = bindings
            .iter()
            .any(|b| b.pattern == routing_key && b.queue == queue);
        if !exists {
            bindings.push(Binding {
                pattern: routing_key.to_string(),
                queue: queue.to_string(),
            });
            info!(
                "Bound queue {} to exchange {} with routing key {}",
                queue, exchange, routing_key
            );
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError> {
        self.declare_exchange(exchange).await?;

        // One copy per queue, however many of its bindings match.
        let targets: Vec<String> = {
            let exchanges = self.exchanges.lock().await;
            let mut targets: Vec<String> = exchanges
                .get(exchange)
                .map(|bindings| {
                    bindings
                        .iter()
                        .filter(|b| topic_matches(&b.pattern, routing_key))
                        .map(|b| b.queue.clone())
                        .collect()
                })
                .unwrap_or_default();
            targets.sort();
            targets.dedup();
            targets
        };

        if targets.is_empty() {
            // Unroutable messages are dropped, as a topic broker would.
            debug!("No binding matches {}:{}", exchange, routing_key);
            return Ok(());
        }

        for queue_name in targets {
            if let Some(queue) = self.queue(&queue_name).await {
                queue.buffer.lock().await.push_back(PendingDelivery {
                    delivery: Delivery {
                        exchange: exchange.to_string(),
                        routing_key: routing_key.to_string(),
                        body: payload.clone(),
                        redelivered: false,
                    },
                    attempts: 0,
                });
                queue.notify.notify_one();
            }
        }

        debug!("Published message to {}:{}", exchange, routing_key);
        Ok(())
    }

    async fn subscribe(
        &self,
        queue_name: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), MessagingError> {
        let queue = match self.queue(queue_name).await {
            Some(q) => q,
            None => {
                warn!("Queue {} not declared yet, declaring now", queue_name);
                self.declare_queue(queue_name).await?;
                self.queue(queue_name).await.ok_or(MessagingError::UnknownQueue {
                    queue: queue_name.to_string(),
                })?
            }
        };

        if queue.subscribed.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::AlreadySubscribed {
                queue: queue_name.to_string(),
            });
        }

        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        let max_redeliveries = self.max_redeliveries;
        let name = queue_name.to_string();

        let worker = tokio::spawn(async move {
            info!("Dispatcher started for queue: {}", name);
            while running.load(Ordering::SeqCst) {
                let next = queue.buffer.lock().await.pop_front();
                match next {
                    Some(mut pending) => {
                        let delivery = pending.delivery.clone();
                        match handler.handle(delivery).await {
                            Ok(()) => {
                                // Ack: nothing more to do.
                                debug!("Message acknowledged from queue: {}", name);
                            }
                            Err(e) => {
                                pending.attempts += 1;
                                if pending.attempts <= max_redeliveries {
                                    warn!(
                                        "Handler error on queue {} (attempt {}): {:#}. Requeueing.",
                                        name, pending.attempts, e
                                    );
                                    pending.delivery.redelivered = true;
                                    queue.buffer.lock().await.push_front(pending);
                                    // Back off briefly before redelivery.
                                    tokio::time::sleep(Duration::from_millis(50)).await;
                                } else {
                                    error!(
                                        "Dropping message from queue {} after {} redeliveries: {:#}",
                                        name, max_redeliveries, e
                                    );
                                }
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = queue.notify.notified() => {}
                            _ = shutdown.notified() => {}
                        }
                    }
                }
            }
            info!("Dispatcher stopped for queue: {}", name);
        });

        self.workers.lock().await.push(worker);
        info!("Subscribed to queue: {}", queue_name);
        Ok(())
    }

    async fn stop(&self) {
        info!("Stopping message bus...");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let mut workers = self.workers.lock().await;
        for mut worker in workers.drain(..) {
            if tokio::time::timeout(STOP_GRACE, &mut worker).await.is_err() {
                warn!("Dispatcher did not stop within grace period, aborting");
                worker.abort();
            }
        }
        info!("Message bus stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _delivery: Delivery) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailOnceHandler {
        attempts: Arc<AtomicUsize>,
        redelivered_seen: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MessageHandler for FailOnceHandler {
        async fn handle(&self, delivery: Delivery) -> anyhow::Result<()> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("transient failure");
            }
            self.redelivered_seen
                .store(delivery.redelivered, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn test_publish_routes_to_bound_queue() {
        let bus = InProcessBus::new();
        bus.bind_queue("market_data", "candles_data", "candle.new.#")
            .await
            .unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "candles_data",
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await
        .unwrap();

        bus.publish("market_data", "candle.new.hl.BTC-USD.1h", b"{}".to_vec())
            .await
            .unwrap();
        bus.publish("market_data", "trade.new.hl.BTC-USD", b"{}".to_vec())
            .await
            .unwrap();

        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_handler_error_triggers_redelivery() {
        let bus = InProcessBus::new();
        bus.bind_queue("execution", "execution_orders", "order.#")
            .await
            .unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let redelivered = Arc::new(AtomicBool::new(false));
        bus.subscribe(
            "execution_orders",
            Arc::new(FailOnceHandler {
                attempts: Arc::clone(&attempts),
                redelivered_seen: Arc::clone(&redelivered),
            }),
        )
        .await
        .unwrap();

        bus.publish("execution", "order.new.hl.BTC-USD", b"{}".to_vec())
            .await
            .unwrap();

        settle().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(redelivered.load(Ordering::SeqCst));
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_single_subscriber_per_queue() {
        let bus = InProcessBus::new();
        bus.declare_queue("strategy_signals").await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "strategy_signals",
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await
        .unwrap();

        let second = bus
            .subscribe(
                "strategy_signals",
                Arc::new(CountingHandler { count }),
            )
            .await;
        assert!(matches!(
            second,
            Err(MessagingError::AlreadySubscribed { .. })
        ));
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_overlapping_bindings_deliver_one_copy() {
        let bus = InProcessBus::new();
        bus.bind_queue("execution", "execution_orders", "order.#")
            .await
            .unwrap();
        bus.bind_queue("execution", "execution_orders", "order.new.#")
            .await
            .unwrap();

        bus.publish("execution", "order.new.hl.BTC-USD", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(bus.queue_depth("execution_orders").await, 1);
    }

    #[tokio::test]
    async fn test_messages_buffer_until_subscriber_attaches() {
        let bus = InProcessBus::new();
        bus.bind_queue("market_data", "candles_data", "candle.new.#")
            .await
            .unwrap();

        bus.publish("market_data", "candle.new.hl.BTC-USD.1h", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(bus.queue_depth("candles_data").await, 1);

        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "candles_data",
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        )
        .await
        .unwrap();

        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.queue_depth("candles_data").await, 0);
        bus.stop().await;
    }
}
