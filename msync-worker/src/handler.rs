//! Per-message handling
//!
//! Each queue message is decoded and turned into one [`MessageAction`]:
//! - `sync_queue`: a [`SyncRequest`] is dispatched, a [`SchedulerNotice`] is
//!   logged, anything else is dropped
//! - entity queues: a [`SyncStatusEvent`] is recorded in `sync_log`, a
//!   trigger carrying dates (or `altru_id` on the customer queue) runs that
//!   entity's sync, anything else is dropped

use msync_common::db::{sync_log, Database};
use msync_common::events::{
    DateRange, SchedulerNotice, SyncKind, SyncRequest, SyncStatusEvent, SYNC_QUEUE,
};
use msync_common::sync::{SyncReport, SyncServices};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageAction {
    /// A sync request ran; `success` is false if any entity failed
    Dispatched {
        request_type: &'static str,
        success: bool,
    },
    Notice(SchedulerNotice),
    /// A status event was stored under this `sync_log` id
    Recorded { event: &'static str, log_id: i64 },
    /// An entity-queue trigger ran that entity's sync
    Triggered { kind: SyncKind, report: SyncReport },
    Dropped { reason: String },
}

/// Body of a trigger on an entity queue
#[derive(Debug, Deserialize)]
struct EntityTrigger {
    start_date: Option<String>,
    end_date: Option<String>,
    altru_id: Option<String>,
}

pub struct MessageHandler {
    services: SyncServices,
    db: Arc<Database>,
}

impl MessageHandler {
    pub fn new(services: SyncServices, db: Arc<Database>) -> Self {
        Self { services, db }
    }

    /// Handle one raw message from `queue`
    pub async fn handle(&self, queue: &str, body: &[u8]) -> MessageAction {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => return dropped(queue, format!("invalid JSON: {}", e)),
        };

        if queue == SYNC_QUEUE {
            return self.handle_sync_queue(value).await;
        }

        match SyncKind::from_events_queue(queue) {
            Some(kind) => self.handle_entity_queue(queue, kind, value).await,
            None => dropped(queue, "unknown queue".to_string()),
        }
    }

    async fn handle_sync_queue(&self, value: Value) -> MessageAction {
        if let Ok(notice) = serde_json::from_value::<SchedulerNotice>(value.clone()) {
            info!(notice = ?notice, "Scheduler notice received");
            return MessageAction::Notice(notice);
        }

        let request = match serde_json::from_value::<SyncRequest>(value) {
            Ok(request) => request,
            Err(e) => return dropped(SYNC_QUEUE, format!("not a sync request: {}", e)),
        };

        let outcome = self.services.dispatch(&request).await;
        let success = outcome.is_success();
        if success {
            info!(request_type = outcome.request_type, "Sync request processed");
        } else {
            warn!(request_type = outcome.request_type, reports = ?outcome.reports, "Sync request had failures");
        }

        MessageAction::Dispatched {
            request_type: outcome.request_type,
            success,
        }
    }

    async fn handle_entity_queue(&self, queue: &str, kind: SyncKind, value: Value) -> MessageAction {
        if let Ok(status) = serde_json::from_value::<SyncStatusEvent>(value.clone()) {
            let event = status.name();
            let status_str = status.status().map(|s| s.as_str());
            return match sync_log::record(&self.db, queue, event, status_str, &value).await {
                Ok(log_id) => {
                    debug!(queue = %queue, event, log_id, "Status event recorded");
                    MessageAction::Recorded { event, log_id }
                }
                Err(e) => dropped(queue, format!("failed to record {}: {}", event, e)),
            };
        }

        let trigger = match serde_json::from_value::<EntityTrigger>(value) {
            Ok(trigger) => trigger,
            Err(e) => return dropped(queue, format!("unreadable message: {}", e)),
        };

        let report = match kind {
            SyncKind::Customer => {
                let altru_id = trigger
                    .altru_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty());
                match altru_id {
                    Some(altru_id) => self.services.customers.sync_customer(altru_id).await,
                    None => return dropped(queue, "missing altru_id".to_string()),
                }
            }
            _ => {
                let range = match (&trigger.start_date, &trigger.end_date) {
                    (Some(start), Some(end)) => match DateRange::parse(start, end) {
                        Ok(range) => range,
                        Err(e) => return dropped(queue, e.to_string()),
                    },
                    _ => return dropped(queue, "missing dates".to_string()),
                };
                self.services.run_kind(kind, &range).await
            }
        };

        info!(queue = %queue, kind = %kind, total = report.total, "Entity sync triggered from queue");
        MessageAction::Triggered { kind, report }
    }
}

fn dropped(queue: &str, reason: String) -> MessageAction {
    error!(queue = %queue, reason = %reason, "Dropping message");
    MessageAction::Dropped { reason }
}
