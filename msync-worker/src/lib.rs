//! msync-worker library: consumes the broker queues and runs the sync
//! services
//!
//! One consumer task per queue in [`ALL_QUEUES`]. A consumer whose stream
//! ends while the worker is still running is restarted after a short delay.

pub mod handler;

use handler::MessageHandler;
use msync_common::broker::MessageBroker;
use msync_common::db::Database;
use msync_common::events::ALL_QUEUES;
use msync_common::sync::SyncServices;
use msync_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use handler::MessageAction;

/// Delay before a consumer whose stream ended is attached again
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct Worker {
    handler: Arc<MessageHandler>,
    broker: Arc<dyn MessageBroker>,
}

impl Worker {
    pub fn new(services: SyncServices, broker: Arc<dyn MessageBroker>, db: Arc<Database>) -> Self {
        Self {
            handler: Arc::new(MessageHandler::new(services, db)),
            broker,
        }
    }

    /// Handle one message as its queue consumer would
    pub async fn handle_message(&self, queue: &str, body: &[u8]) -> MessageAction {
        self.handler.handle(queue, body).await
    }

    /// Declare every queue and consume until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        for queue in ALL_QUEUES {
            self.broker.declare_queue(queue).await?;
        }

        let mut consumers = JoinSet::new();
        for queue in ALL_QUEUES {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            consumers.spawn(async move { worker.consume(queue, shutdown).await });
        }
        info!(queues = ALL_QUEUES.len(), "Worker started");

        while let Some(joined) = consumers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Consumer task ended abnormally");
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    async fn consume(&self, queue: &'static str, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            match self.broker.subscribe(queue).await {
                Ok(mut subscription) => {
                    info!(queue = %queue, "Consumer attached");
                    loop {
                        let next = tokio::select! {
                            _ = shutdown.cancelled() => return,
                            next = subscription.next() => next,
                        };

                        match next {
                            Some(Ok(body)) => {
                                self.handler.handle(queue, &body).await;
                            }
                            Some(Err(e)) => {
                                warn!(queue = %queue, error = %e, "Failed to receive message");
                            }
                            None => break,
                        }
                    }
                    if !shutdown.is_cancelled() {
                        warn!(queue = %queue, "Consumer stream ended; restarting");
                    }
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Failed to subscribe");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(RESTART_DELAY) => {}
            }
        }
    }
}
