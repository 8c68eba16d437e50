use super::{StatusPublisher, SyncReport};
use crate::broker::MessageBroker;
use crate::crm::{CrmClient, Ticket};
use crate::db::{Database, SqlParam};
use crate::events::{DateRange, SyncStatus, SyncStatusEvent};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{error, info};

const UPSERT_WRISTBAND: &str = r#"
    INSERT INTO wristbands (external_key, event_id, issued_at)
    VALUES (?, ?, ?)
    ON CONFLICT(external_key) DO UPDATE SET
        event_id = excluded.event_id,
        issued_at = excluded.issued_at
    RETURNING id
"#;

/// Mirrors CRM ticket sales into `wristbands`
#[derive(Clone)]
pub struct WristbandSyncService {
    db: Arc<Database>,
    crm: Arc<dyn CrmClient>,
    publisher: StatusPublisher,
}

impl WristbandSyncService {
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

    pub async fn sync_wristbands(&self, range: &DateRange) -> SyncReport {
        info!(start_date = %range.start_date, end_date = %range.end_date, "Starting wristbands sync");

        let tickets = match self.crm.get_tickets(range).await {
            Ok(tickets) => tickets,
            Err(e) => {
                error!(range = %range, error = %e, "Failed to fetch tickets");
                Vec::new()
            }
        };

        if tickets.is_empty() {
            error!(range = %range, "No wristband or ticket data returned");
            self.publisher
                .publish(SyncStatusEvent::wristbands_empty(*range))
                .await;
            return SyncReport::aborted("no ticket data returned");
        }

        let mut success_count = 0;
        let mut failed_count = 0;

        for ticket in &tickets {
            match self.upsert(ticket).await {
                Ok(wristband_id) => {
                    success_count += 1;
                    self.publisher
                        .publish(SyncStatusEvent::WristbandSynced {
                            wristband_id,
                            event_id: ticket.event_id.clone(),
                            status: SyncStatus::Success,
                        })
                        .await;
                }
                Err(e) => {
                    failed_count += 1;
                    error!(event_id = %ticket.event_id, error = %e, "Failed to store wristband");
                    self.publisher
                        .publish(SyncStatusEvent::WristbandSyncFailed {
                            event_id: ticket.event_id.clone(),
                            status: SyncStatus::Failed,
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
            "Wristbands sync finished"
        );

        self.publisher
            .publish(SyncStatusEvent::WristbandsSyncCompleted {
                start_date: range.start_date,
                end_date: range.end_date,
                success_count: report.success_count,
                failed_count: report.failed_count,
                total: report.total,
                status: SyncStatus::from_failures(report.failed_count),
            })
            .await;

        report
    }

    async fn upsert(&self, ticket: &Ticket) -> Result<i64> {
        ticket.validate()?;

        let params: Vec<SqlParam> = vec![
            ticket.external_key().into(),
            ticket.event_id.as_str().into(),
            ticket.issued_at.as_str().into(),
        ];

        self.db
            .execute(UPSERT_WRISTBAND, &params)
            .await?
            .inserted_id()
            .ok_or_else(|| Error::Internal("wristband upsert returned no id".to_string()))
    }
}
