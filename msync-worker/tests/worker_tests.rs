//! Worker message handling against an in-memory database, broker and CRM

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use msync_common::broker::{publish_json, InMemoryBroker, MessageBroker, Subscription};
use msync_common::config::AppConfig;
use msync_common::crm::{Constituent, CrmEvent, InMemoryCrm, Ticket};
use msync_common::db::{sync_log, Database};
use msync_common::events::{
    DateRange, SchedulerNotice, SyncKind, SyncRequest, SyncStatusEvent, CUSTOMER_EVENTS_QUEUE,
    EVENT_EVENTS_QUEUE, SYNC_QUEUE, WRISTBAND_EVENTS_QUEUE,
};
use msync_common::sync::SyncServices;
use msync_worker::{MessageAction, Worker, RESTART_DELAY};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn crm() -> InMemoryCrm {
    InMemoryCrm::new()
        .with_constituent(
            "A1",
            Constituent {
                first_name: Some("Ada".to_string()),
                ..Default::default()
            },
        )
        .with_events(vec![CrmEvent {
            id: "EV1".to_string(),
            name: Some("Gala".to_string()),
            start_date: Some("2025-01-01".to_string()),
            ..Default::default()
        }])
        .with_tickets(vec![Ticket {
            id: Some("T1".to_string()),
            event_id: "EV1".to_string(),
            issued_at: "2025-01-01T10:00:00".to_string(),
        }])
}

async fn setup() -> (Worker, Arc<Database>, Arc<InMemoryBroker>) {
    let db = Arc::new(Database::in_memory().await.unwrap());
    let broker = Arc::new(InMemoryBroker::new(100));
    let shared: Arc<dyn MessageBroker> = broker.clone();

    let services = SyncServices::new(db.clone(), Arc::new(crm()), Some(shared.clone()), &AppConfig::default());
    let worker = Worker::new(services, shared, db.clone());
    (worker, db, broker)
}

async fn count(db: &Database, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db.pool())
        .await
        .unwrap()
}

fn body(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

#[tokio::test]
async fn test_sync_queue_dispatches_request() {
    let (worker, db, _broker) = setup().await;
    let range = DateRange::parse("2025-01-01", "2025-01-01").unwrap();
    let request = serde_json::to_vec(&SyncRequest::EventSync(range)).unwrap();

    let action = worker.handle_message(SYNC_QUEUE, &request).await;
    assert_eq!(
        action,
        MessageAction::Dispatched {
            request_type: "event_sync",
            success: true
        }
    );
    assert_eq!(count(&db, "events").await, 1);
}

#[tokio::test]
async fn test_sync_queue_logs_scheduler_notice() {
    let (worker, db, _broker) = setup().await;
    let notice = SchedulerNotice::DailySyncStarted {
        date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
    };

    let action = worker
        .handle_message(SYNC_QUEUE, &serde_json::to_vec(&notice).unwrap())
        .await;
    assert_eq!(action, MessageAction::Notice(notice));
    assert_eq!(count(&db, "events").await, 0);
}

#[tokio::test]
async fn test_sync_queue_drops_malformed_messages() {
    let (worker, _db, _broker) = setup().await;

    let action = worker.handle_message(SYNC_QUEUE, b"{not json").await;
    assert!(matches!(action, MessageAction::Dropped { .. }));

    let action = worker
        .handle_message(SYNC_QUEUE, &body(json!({"type": "inventory_sync"})))
        .await;
    assert!(matches!(action, MessageAction::Dropped { .. }));
}

#[tokio::test]
async fn test_entity_queue_records_status_events() {
    let (worker, db, _broker) = setup().await;
    let range = DateRange::parse("2025-01-01", "2025-01-02").unwrap();
    let status = SyncStatusEvent::wristbands_empty(range);

    let action = worker
        .handle_message(WRISTBAND_EVENTS_QUEUE, &serde_json::to_vec(&status).unwrap())
        .await;
    assert!(matches!(action, MessageAction::Recorded { event: "wristband_sync_empty", .. }));

    let entries = sync_log::recent(&db, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].queue, WRISTBAND_EVENTS_QUEUE);
    assert_eq!(entries[0].status.as_deref(), Some("no_data"));
    assert_eq!(count(&db, "wristbands").await, 0);
}

#[tokio::test]
async fn test_entity_queue_trigger_with_dates_runs_sync() {
    let (worker, db, _broker) = setup().await;

    let action = worker
        .handle_message(
            WRISTBAND_EVENTS_QUEUE,
            &body(json!({"start_date": "2025-01-01", "end_date": "2025-01-01"})),
        )
        .await;
    match action {
        MessageAction::Triggered { kind, report } => {
            assert_eq!(kind, SyncKind::Wristband);
            assert_eq!(report.success_count, 1);
        }
        other => panic!("unexpected action: {:?}", other),
    }
    assert_eq!(count(&db, "wristbands").await, 1);
}

#[tokio::test]
async fn test_entity_queue_without_dates_is_dropped() {
    let (worker, db, _broker) = setup().await;

    let action = worker
        .handle_message(EVENT_EVENTS_QUEUE, &body(json!({"start_date": "2025-01-01"})))
        .await;
    assert_eq!(
        action,
        MessageAction::Dropped {
            reason: "missing dates".to_string()
        }
    );

    let action = worker
        .handle_message(
            EVENT_EVENTS_QUEUE,
            &body(json!({"start_date": "2025-02-01", "end_date": "2025-01-01"})),
        )
        .await;
    assert!(matches!(action, MessageAction::Dropped { .. }));
    assert_eq!(count(&db, "events").await, 0);
}

#[tokio::test]
async fn test_customer_queue_trigger_uses_altru_id() {
    let (worker, db, _broker) = setup().await;

    let action = worker
        .handle_message(CUSTOMER_EVENTS_QUEUE, &body(json!({"altru_id": "A1"})))
        .await;
    assert!(matches!(
        action,
        MessageAction::Triggered {
            kind: SyncKind::Customer,
            ..
        }
    ));
    assert_eq!(count(&db, "customers").await, 1);

    let action = worker
        .handle_message(CUSTOMER_EVENTS_QUEUE, &body(json!({})))
        .await;
    assert!(matches!(action, MessageAction::Dropped { .. }));
}

#[tokio::test]
async fn test_run_consumes_queues_until_cancelled() {
    let (worker, db, broker) = setup().await;
    let range = DateRange::parse("2025-01-01", "2025-01-01").unwrap();
    publish_json(broker.as_ref(), SYNC_QUEUE, &SyncRequest::EventSync(range))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let running = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    // The event sync mirrors EV1 and its status events land in sync_log
    let mut logged = Vec::new();
    for _ in 0..100 {
        logged = sync_log::recent(&db, 50).await.unwrap();
        if count(&db, "events").await == 1 && !logged.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(count(&db, "events").await, 1);
    assert!(logged.iter().any(|entry| entry.queue == EVENT_EVENTS_QUEUE));

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

/// Broker whose streams can be ended from the test; counts subscriptions
#[derive(Default)]
struct EndableBroker {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<msync_common::Result<Vec<u8>>>>>,
    subscribes: Mutex<HashMap<String, usize>>,
}

impl EndableBroker {
    fn subscribes(&self, queue: &str) -> usize {
        self.subscribes.lock().unwrap().get(queue).copied().unwrap_or(0)
    }

    /// Drop the live sender so the consumer sees its stream end
    fn end_stream(&self, queue: &str) {
        self.senders.lock().unwrap().remove(queue);
    }
}

#[async_trait]
impl MessageBroker for EndableBroker {
    async fn declare_queue(&self, _queue: &str) -> msync_common::Result<()> {
        Ok(())
    }

    async fn publish(&self, queue: &str, message: &serde_json::Value) -> msync_common::Result<()> {
        let senders = self.senders.lock().unwrap();
        let tx = senders
            .get(queue)
            .ok_or_else(|| msync_common::Error::Broker(format!("no consumer on {queue}")))?;
        tx.unbounded_send(Ok(serde_json::to_vec(message)?))
            .map_err(|e| msync_common::Error::Broker(e.to_string()))
    }

    async fn subscribe(&self, queue: &str) -> msync_common::Result<Subscription> {
        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().unwrap().insert(queue.to_string(), tx);
        *self.subscribes.lock().unwrap().entry(queue.to_string()).or_default() += 1;
        Ok(Subscription::new(queue, rx.boxed()))
    }

    async fn close(&self) -> msync_common::Result<()> {
        self.senders.lock().unwrap().clear();
        Ok(())
    }
}

async fn wait_for_subscribes(broker: &EndableBroker, queue: &str, expected: usize, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    while broker.subscribes(queue) < expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{queue} was subscribed {} times, expected {expected}",
            broker.subscribes(queue)
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_consumer_reattaches_after_stream_ends() {
    let db = Arc::new(Database::in_memory().await.unwrap());
    let broker = Arc::new(EndableBroker::default());
    let services = SyncServices::new(db.clone(), Arc::new(crm()), None, &AppConfig::default());
    let worker = Worker::new(services, broker.clone(), db.clone());

    let shutdown = CancellationToken::new();
    let running = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    wait_for_subscribes(&broker, SYNC_QUEUE, 1, Duration::from_secs(2)).await;
    broker.end_stream(SYNC_QUEUE);

    // Not attached again before the delay has passed
    tokio::time::sleep(RESTART_DELAY / 2).await;
    assert_eq!(broker.subscribes(SYNC_QUEUE), 1);

    wait_for_subscribes(&broker, SYNC_QUEUE, 2, RESTART_DELAY * 3).await;

    let range = DateRange::parse("2025-01-01", "2025-01-01").unwrap();
    publish_json(broker.as_ref(), SYNC_QUEUE, &SyncRequest::EventSync(range))
        .await
        .unwrap();

    for _ in 0..100 {
        if count(&db, "events").await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(count(&db, "events").await, 1);

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
