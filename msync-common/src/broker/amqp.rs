//! RabbitMQ broker on lapin
//!
//! Queues are durable and addressed through the default exchange with the
//! queue name as routing key. Messages are persistent (delivery mode 2) and
//! consumers auto-acknowledge.

use super::{broker_error, MessageBroker, Subscription};
use crate::Result;
use async_trait::async_trait;
use futures::stream::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PERSISTENT: u8 = 2;

pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    declared: Mutex<HashSet<String>>,
}

impl AmqpBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| broker_error("failed to connect to AMQP broker", e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| broker_error("failed to open AMQP channel", e))?;

        info!("Connected to AMQP broker");
        Ok(Self {
            connection,
            channel,
            declared: Mutex::new(HashSet::new()),
        })
    }

    async fn ensure_declared(&self, queue: &str) -> Result<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(queue) {
            return Ok(());
        }

        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| broker_error(&format!("failed to declare queue '{}'", queue), e))?;

        declared.insert(queue.to_string());
        debug!(queue = %queue, "Queue declared");
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.ensure_declared(queue).await
    }

    async fn publish(&self, queue: &str, message: &serde_json::Value) -> Result<()> {
        self.ensure_declared(queue).await?;
        let payload = serde_json::to_vec(message)?;

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(|e| broker_error("publish failed", e))?
            .await
            .map_err(|e| broker_error("publish not confirmed", e))?;

        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<Subscription> {
        self.ensure_declared(queue).await?;
        let tag = format!("msync-{}-{}", queue, uuid::Uuid::new_v4());

        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| broker_error(&format!("failed to consume '{}'", queue), e))?;

        info!(queue = %queue, consumer_tag = %tag, "Consumer started");
        let stream = consumer
            .map(|delivery| {
                delivery
                    .map(|d| d.data)
                    .map_err(|e| broker_error("delivery failed", e))
            })
            .boxed();

        Ok(Subscription::new(queue, stream))
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.channel.close(200, "closing").await {
            warn!(error = %e, "Error closing AMQP channel");
        }
        self.connection
            .close(200, "closing")
            .await
            .map_err(|e| broker_error("failed to close AMQP connection", e))?;

        info!("AMQP connection closed");
        Ok(())
    }
}
