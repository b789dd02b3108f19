//! Topic-routed message fabric binding the services together.
//!
//! The [`MessageBus`] trait models a durable AMQP-style broker: topic
//! exchanges, durable queues, pattern bindings, persistent publishes and
//! single-callback queue subscriptions with ack/nack semantics. The
//! in-process implementation in [`in_process`] is the deliverable broker;
//! the trait is the seam where a remote client would slot in.

mod in_process;
mod topic;

pub use in_process::InProcessBus;
pub use topic::topic_matches;

use crate::domain::errors::MessagingError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// A message as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

impl Delivery {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, MessagingError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Single callback registered per queue. Returning an error negative-acks
/// the delivery and the broker requeues it, so handlers must be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Idempotent; exchanges are topic-typed and durable.
    async fn declare_exchange(&self, exchange: &str) -> Result<(), MessagingError>;

    /// Idempotent; queues are durable.
    async fn declare_queue(&self, queue: &str) -> Result<(), MessagingError>;

    /// Idempotent. `#` matches one or more routing-key segments, `*`
    /// exactly one.
    async fn bind_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), MessagingError>;

    /// Publish a persistent message. Retries once after an internal
    /// reconnect, then fails the call.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError>;

    /// Register the single consumer for a queue. Deliveries are dispatched
    /// one at a time per queue on a dedicated worker.
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), MessagingError>;

    /// Cooperative shutdown: stop dispatchers, joining with a grace period.
    async fn stop(&self);
}

/// Serialize `value` as JSON and publish it.
pub async fn publish_json<T: Serialize + Sync>(
    bus: &dyn MessageBus,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), MessagingError> {
    let payload = serde_json::to_vec(value)?;
    bus.publish(exchange, routing_key, payload).await
}
