//! Message broker abstraction
//!
//! Producers publish JSON to named queues; consumers read raw payloads from a
//! [`Subscription`]. Two implementations:
//! - [`InMemoryBroker`]: tokio channels, one process (tests, single-binary runs)
//! - `AmqpBroker`: RabbitMQ via lapin (feature `amqp`)

mod memory;
#[cfg(feature = "amqp")]
mod amqp;

pub use memory::InMemoryBroker;
#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;

use crate::config::{BrokerConfig, BrokerKind};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Queue-based publish/subscribe
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare a durable queue; declaring an existing queue is a no-op
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Publish a persistent message, declaring the queue if needed
    async fn publish(&self, queue: &str, message: &serde_json::Value) -> Result<()>;

    /// Start consuming a queue
    async fn subscribe(&self, queue: &str) -> Result<Subscription>;

    /// Stop all consumers and release the connection
    async fn close(&self) -> Result<()>;
}

/// Stream of raw message bodies from one queue
///
/// Ends when the broker is closed or the connection drops.
pub struct Subscription {
    queue: String,
    stream: BoxStream<'static, Result<Vec<u8>>>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, stream: BoxStream<'static, Result<Vec<u8>>>) -> Self {
        Self {
            queue: queue.into(),
            stream,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next message body; `None` once the subscription has ended
    pub async fn next(&mut self) -> Option<Result<Vec<u8>>> {
        self.stream.next().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Serialize `message` and publish it; failures are logged and returned
pub async fn publish_json<T>(broker: &dyn MessageBroker, queue: &str, message: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(message)?;
    match broker.publish(queue, &value).await {
        Ok(()) => {
            debug!(queue = %queue, "Message published");
            Ok(())
        }
        Err(e) => {
            error!(queue = %queue, error = %e, "Failed to publish message");
            Err(e)
        }
    }
}

/// Build the broker selected by configuration
pub async fn connect(config: &BrokerConfig) -> Result<Arc<dyn MessageBroker>> {
    match config.kind {
        BrokerKind::Memory => {
            info!(capacity = config.queue_capacity, "Using in-memory message broker");
            Ok(Arc::new(InMemoryBroker::new(config.queue_capacity)))
        }
        #[cfg(feature = "amqp")]
        BrokerKind::Amqp => {
            let broker = AmqpBroker::connect(&config.url).await?;
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "amqp"))]
        BrokerKind::Amqp => Err(Error::Config(
            "broker.kind = amqp requires the `amqp` feature".to_string(),
        )),
    }
}

/// Shorthand used by the implementations
pub(crate) fn broker_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Broker(format!("{}: {}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_memory_broker() {
        let config = BrokerConfig::default();
        let broker = connect(&config).await.unwrap();

        let mut sub = broker.subscribe("q").await.unwrap();
        publish_json(broker.as_ref(), "q", &json!({"type": "full_sync"}))
            .await
            .unwrap();

        let body = sub.next().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["type"], "full_sync");
        assert_eq!(sub.queue(), "q");
    }
}
