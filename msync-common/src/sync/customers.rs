use super::{StatusPublisher, SyncReport};
use crate::broker::MessageBroker;
use crate::crm::{Constituent, CrmClient};
use crate::db::{Database, SqlParam};
use crate::events::{SyncStatus, SyncStatusEvent};
use crate::Result;
use std::sync::Arc;
use tracing::{error, info};

const UPSERT_CUSTOMER: &str = r#"
    INSERT INTO customers
        (member_id, first_name, last_name, phone, email, address1, address2,
         city, state, zip, altru_id)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(altru_id) DO UPDATE SET
        member_id = excluded.member_id,
        first_name = excluded.first_name,
        last_name = excluded.last_name,
        phone = excluded.phone,
        email = excluded.email,
        address1 = excluded.address1,
        address2 = excluded.address2,
        city = excluded.city,
        state = excluded.state,
        zip = excluded.zip,
        updated_at = CURRENT_TIMESTAMP
    RETURNING id
"#;

/// Mirrors one CRM constituent into `customers`
#[derive(Clone)]
pub struct CustomerSyncService {
    db: Arc<Database>,
    crm: Arc<dyn CrmClient>,
    publisher: StatusPublisher,
}

impl CustomerSyncService {
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

    pub async fn sync_customer(&self, altru_id: &str) -> SyncReport {
        info!(altru_id = %altru_id, "Starting customer sync");

        let constituent = match self.crm.get_constituent(altru_id).await {
            Ok(Some(constituent)) => constituent,
            Ok(None) => {
                error!(altru_id = %altru_id, "Constituent not found in CRM");
                self.publish_failed(altru_id).await;
                return SyncReport {
                    failed_count: 1,
                    total: 1,
                    error: Some(format!("constituent {} not found", altru_id)),
                    ..Default::default()
                };
            }
            Err(e) => {
                error!(altru_id = %altru_id, error = %e, "Failed to fetch constituent");
                self.publish_failed(altru_id).await;
                return SyncReport {
                    failed_count: 1,
                    total: 1,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        match self.upsert(altru_id, &constituent).await {
            Ok(id) => {
                info!(altru_id = %altru_id, customer_id = id, "Customer synced");
                self.publisher
                    .publish(SyncStatusEvent::CustomerSynced {
                        altru_id: altru_id.to_string(),
                        status: SyncStatus::Success,
                    })
                    .await;
                SyncReport::from_counts(1, 0)
            }
            Err(e) => {
                error!(altru_id = %altru_id, error = %e, "Failed to store customer");
                self.publish_failed(altru_id).await;
                SyncReport::from_counts(0, 1)
            }
        }
    }

    async fn upsert(&self, altru_id: &str, c: &Constituent) -> Result<i64> {
        let params: Vec<SqlParam> = vec![
            c.member_id.clone().into(),
            c.first_name.clone().into(),
            c.last_name.clone().into(),
            c.phone.clone().into(),
            c.email.clone().into(),
            c.address_line(0).into(),
            c.address_line(1).into(),
            c.city.clone().into(),
            c.state.clone().into(),
            c.postal_code.clone().into(),
            altru_id.into(),
        ];

        self.db
            .execute(UPSERT_CUSTOMER, &params)
            .await?
            .inserted_id()
            .ok_or_else(|| crate::Error::Internal("customer upsert returned no id".to_string()))
    }

    async fn publish_failed(&self, altru_id: &str) {
        self.publisher
            .publish(SyncStatusEvent::CustomerSyncFailed {
                altru_id: altru_id.to_string(),
                status: SyncStatus::Failed,
            })
            .await;
    }
}
