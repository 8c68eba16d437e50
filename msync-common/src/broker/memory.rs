//! In-process broker on tokio mpsc channels

use super::{broker_error, MessageBroker, Subscription};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

struct QueueSlot {
    tx: mpsc::Sender<Vec<u8>>,
    /// Taken by the single consumer
    rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl QueueSlot {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: Some(rx) }
    }
}

/// Bounded per-queue channels
///
/// Messages published before anyone subscribes are buffered up to the
/// capacity. Each queue has at most one live consumer; once that consumer is
/// dropped the queue can be subscribed again.
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, QueueSlot>>,
    capacity: usize,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Broker("broker is closed".to_string()));
        }
        Ok(())
    }

    fn sender(&self, queue: &str) -> Result<mpsc::Sender<Vec<u8>>> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|e| broker_error("queue table poisoned", e))?;
        let slot = queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueSlot::new(self.capacity));
        Ok(slot.tx.clone())
    }

    /// Messages waiting in a queue
    pub fn pending(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| {
                queues
                    .get(queue)
                    .map(|slot| slot.tx.max_capacity() - slot.tx.capacity())
            })
            .unwrap_or(0)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.ensure_open()?;
        self.sender(queue)?;
        debug!(queue = %queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, message: &serde_json::Value) -> Result<()> {
        self.ensure_open()?;
        let payload = serde_json::to_vec(message)?;
        let tx = self.sender(queue)?;

        tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => Error::Broker(format!("queue '{}' is full", queue)),
            TrySendError::Closed(_) => Error::Broker(format!("queue '{}' is closed", queue)),
        })
    }

    async fn subscribe(&self, queue: &str) -> Result<Subscription> {
        self.ensure_open()?;
        let mut queues = self
            .queues
            .lock()
            .map_err(|e| broker_error("queue table poisoned", e))?;
        let slot = queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueSlot::new(self.capacity));

        let rx = match slot.rx.take() {
            Some(rx) => rx,
            // Previous consumer went away; start a fresh channel
            None if slot.tx.is_closed() => {
                *slot = QueueSlot::new(self.capacity);
                slot.rx.take().ok_or_else(|| {
                    Error::Internal(format!("new queue '{}' has no receiver", queue))
                })?
            }
            None => {
                return Err(Error::Broker(format!(
                    "queue '{}' already has a consumer",
                    queue
                )))
            }
        };

        debug!(queue = %queue, "Consumer attached");
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (Ok(payload), rx))
        })
        .boxed();

        Ok(Subscription::new(queue, stream))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders ends every subscription
        if let Ok(mut queues) = self.queues.lock() {
            queues.clear();
        }
        info!("In-memory broker closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_before_subscribe_is_buffered() {
        let broker = InMemoryBroker::new(10);
        broker.publish("q", &json!({"n": 1})).await.unwrap();
        broker.publish("q", &json!({"n": 2})).await.unwrap();
        assert_eq!(broker.pending("q"), 2);

        let mut sub = broker.subscribe("q").await.unwrap();
        let first: serde_json::Value =
            serde_json::from_slice(&sub.next().await.unwrap().unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_slice(&sub.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 2);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_publish() {
        let broker = InMemoryBroker::new(1);
        broker.publish("q", &json!(1)).await.unwrap();
        let err = broker.publish("q", &json!(2)).await.unwrap_err();
        assert!(matches!(err, Error::Broker(_)));
    }

    #[tokio::test]
    async fn test_second_consumer_is_rejected() {
        let broker = InMemoryBroker::new(10);
        let _first = broker.subscribe("q").await.unwrap();
        assert!(broker.subscribe("q").await.is_err());
    }

    #[tokio::test]
    async fn test_resubscribe_after_consumer_dropped() {
        let broker = InMemoryBroker::new(10);
        let first = broker.subscribe("q").await.unwrap();
        drop(first);

        let mut second = broker.subscribe("q").await.unwrap();
        broker.publish("q", &json!("again")).await.unwrap();
        assert!(second.next().await.is_some());
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let broker = InMemoryBroker::new(10);
        let mut sub = broker.subscribe("q").await.unwrap();
        broker.close().await.unwrap();

        assert!(sub.next().await.is_none());
        assert!(broker.publish("q", &json!(1)).await.is_err());
    }
}
