use super::{StatusPublisher, SyncReport};
use crate::broker::MessageBroker;
use crate::crm::{Coordinator, CrmClient, CrmEvent};
use crate::db::{Database, SqlParam};
use crate::events::{DateRange, SyncStatus, SyncStatusEvent};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

const FIND_EMPLOYEE: &str = r#"
    SELECT id FROM employees
    WHERE email = ? OR (first_name = ? AND last_name = ?)
    ORDER BY id
    LIMIT 1
"#;

const INSERT_EMPLOYEE: &str =
    "INSERT INTO employees (first_name, last_name, phone, email) VALUES (?, ?, ?, ?)";

/// The customer link is resolved in SQL; an unknown constituent leaves it NULL
const UPSERT_EVENT: &str = r#"
    INSERT INTO events (altru_event_id, customer_id, employee_id, name, event_date)
    VALUES (?, (SELECT id FROM customers WHERE altru_id = ?), ?, ?, ?)
    ON CONFLICT(altru_event_id) DO UPDATE SET
        customer_id = excluded.customer_id,
        employee_id = excluded.employee_id,
        name = excluded.name,
        event_date = excluded.event_date,
        updated_at = CURRENT_TIMESTAMP
    RETURNING id
"#;

/// Mirrors CRM events, and their coordinators, into `events` / `employees`
#[derive(Clone)]
pub struct EventSyncService {
    db: Arc<Database>,
    crm: Arc<dyn CrmClient>,
    publisher: StatusPublisher,
}

impl EventSyncService {
    pub fn new(db: Arc<Database>, crm: Arc<dyn CrmClient>) -> Self {
        Self {
            db,
            crm,
            publisher: StatusPublisher::default(),
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.publisher = StatusPublisher::new(Some(broker));
        self
    }

    pub async fn sync_events(&self, range: &DateRange) -> SyncReport {
        info!(start_date = %range.start_date, end_date = %range.end_date, "Starting events sync");

        // Nothing is published when the fetch yields nothing
        let events = match self.crm.get_events(range).await {
            Ok(events) if !events.is_empty() => events,
            Ok(_) => {
                error!(range = %range, "No events returned from CRM");
                return SyncReport::aborted("no events returned");
            }
            Err(e) => {
                error!(range = %range, error = %e, "Failed to fetch events");
                return SyncReport::aborted(e.to_string());
            }
        };

        let mut success_count = 0;
        let mut failed_count = 0;

        for event in &events {
            match self.sync_one(event).await {
                Ok(_) => {
                    success_count += 1;
                    self.publisher
                        .publish(SyncStatusEvent::EventSynced {
                            event_id: event.id.clone(),
                            status: SyncStatus::Success,
                            name: event.name.clone(),
                        })
                        .await;
                }
                Err(e) => {
                    failed_count += 1;
                    error!(event_id = %event.id, error = %e, "Failed to store event");
                    self.publisher
                        .publish(SyncStatusEvent::EventSyncFailed {
                            event_id: event.id.clone(),
                            status: SyncStatus::Failed,
                            name: event.name.clone(),
                        })
                        .await;
                }
            }
        }

        let report = SyncReport::from_counts(success_count, failed_count);
        info!(
            synced = report.success_count,
            total = report.total,
            range = %range,
            "Events sync finished"
        );

        self.publisher
            .publish(SyncStatusEvent::EventsSyncCompleted {
                start_date: range.start_date,
                end_date: range.end_date,
                success_count: report.success_count,
                failed_count: report.failed_count,
                total: report.total,
            })
            .await;

        report
    }

    /// Existing employee id, or the id of a newly inserted one. Lookup
    /// failures leave the event without a coordinator.
    async fn resolve_coordinator(&self, coordinator: &Coordinator) -> Option<i64> {
        match self.find_or_insert_employee(coordinator).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Could not resolve event coordinator");
                None
            }
        }
    }

    async fn find_or_insert_employee(&self, c: &Coordinator) -> Result<i64> {
        let lookup: Vec<SqlParam> = vec![
            c.email.clone().into(),
            c.first_name.clone().into(),
            c.last_name.clone().into(),
        ];
        if let Some(id) = self.db.execute(FIND_EMPLOYEE, &lookup).await?.first_i64() {
            return Ok(id);
        }

        let insert: Vec<SqlParam> = vec![
            c.first_name.clone().into(),
            c.last_name.clone().into(),
            c.phone.clone().into(),
            c.email.clone().into(),
        ];
        self.db
            .execute(INSERT_EMPLOYEE, &insert)
            .await?
            .inserted_id()
            .ok_or_else(|| Error::Internal("employee insert returned no id".to_string()))
    }

    async fn sync_one(&self, event: &CrmEvent) -> Result<i64> {
        event.validate()?;

        let employee_id = match event.coordinator() {
            Some(coordinator) => self.resolve_coordinator(coordinator).await,
            None => None,
        };
        self.upsert(event, employee_id).await
    }

    async fn upsert(&self, event: &CrmEvent, employee_id: Option<i64>) -> Result<i64> {
        let params: Vec<SqlParam> = vec![
            event.id.as_str().into(),
            event.constituent_id.clone().into(),
            employee_id.into(),
            event.name.clone().into(),
            event.start_date.clone().into(),
        ];

        self.db
            .execute(UPSERT_EVENT, &params)
            .await?
            .inserted_id()
            .ok_or_else(|| Error::Internal(format!("event {} upsert returned no id", event.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::crm::InMemoryCrm;

    fn event(id: &str, constituent: Option<&str>, coordinator: Option<Coordinator>) -> CrmEvent {
        CrmEvent {
            id: id.to_string(),
            constituent_id: constituent.map(str::to_string),
            name: Some(format!("Event {}", id)),
            start_date: Some("2025-01-01".to_string()),
            coordinator,
        }
    }

    fn grace() -> Coordinator {
        Coordinator {
            first_name: Some("Grace".to_string()),
            last_name: Some("Hopper".to_string()),
            email: Some("grace@example.org".to_string()),
            phone: None,
        }
    }

    fn range() -> DateRange {
        DateRange::parse("2025-01-01", "2025-01-02").unwrap()
    }

    #[tokio::test]
    async fn test_coordinator_is_reused_across_events() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let crm = Arc::new(InMemoryCrm::new().with_events(vec![
            event("E1", None, Some(grace())),
            event("E2", None, Some(grace())),
            event("E3", None, Some(Coordinator::default())),
        ]));
        let service = EventSyncService::new(db.clone(), crm);

        let report = service.sync_events(&range()).await;
        assert_eq!(report, SyncReport::from_counts(3, 0));

        let employees: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM employees")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(employees, 1);

        let unlinked: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE employee_id IS NULL")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(unlinked, 1);
    }

    #[tokio::test]
    async fn test_event_links_known_customer() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        sqlx::query("INSERT INTO customers (altru_id) VALUES ('C1')")
            .execute(db.pool())
            .await
            .unwrap();
        let crm = Arc::new(
            InMemoryCrm::new()
                .with_events(vec![event("E1", Some("C1"), None), event("E2", Some("C9"), None)]),
        );
        let service = EventSyncService::new(db.clone(), crm);
        service.sync_events(&range()).await;

        let linked: Vec<(String, Option<i64>)> = sqlx::query_as(
            "SELECT altru_event_id, customer_id FROM events ORDER BY altru_event_id",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(linked, vec![("E1".to_string(), Some(1)), ("E2".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_event_without_id_is_counted_failed() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let crm = Arc::new(InMemoryCrm::new().with_events(vec![
            event("E1", None, None),
            event("", None, Some(grace())),
        ]));
        let service = EventSyncService::new(db.clone(), crm);

        assert_eq!(service.sync_events(&range()).await, SyncReport::from_counts(1, 1));

        let employees: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM employees")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(employees, 0);
    }

    #[tokio::test]
    async fn test_empty_fetch_fails_without_publishing() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let broker = Arc::new(InMemoryBroker::new(10));
        let service = EventSyncService::new(db, Arc::new(InMemoryCrm::new()))
            .with_broker(broker.clone());

        let report = service.sync_events(&range()).await;
        assert!(!report.is_success());
        assert_eq!(report.total, 0);
        assert_eq!(broker.pending("event_sync_events"), 0);
    }

    #[tokio::test]
    async fn test_publishes_per_event_and_summary() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let broker = Arc::new(InMemoryBroker::new(10));
        let crm = Arc::new(InMemoryCrm::new().with_events(vec![event("E1", None, None)]));
        let service = EventSyncService::new(db, crm).with_broker(broker.clone());

        service.sync_events(&range()).await;
        assert_eq!(broker.pending("event_sync_events"), 2);
    }
}
