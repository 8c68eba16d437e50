use super::{ParkingQuota, StatusPublisher, SyncReport};
use crate::broker::MessageBroker;
use crate::crm::{CrmClient, CrmParkingPass};
use crate::db::{finish_immediate, Database, SqlParam};
use crate::events::{DateRange, SyncStatus, SyncStatusEvent};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{error, info, warn};

const FIND_BY_KEY: &str = "SELECT id FROM parking_passes WHERE external_key = ?";

const COUNT_FOR_EVENT: &str = "SELECT COUNT(*) FROM parking_passes WHERE event_id = ?";

const UPSERT_PASS: &str = r#"
    INSERT INTO parking_passes (external_key, event_id, issued_at)
    VALUES (?, ?, ?)
    ON CONFLICT(external_key) DO UPDATE SET
        issued_at = excluded.issued_at
    RETURNING id
"#;

const UPSERT_PASS_TYPE: &str = r#"
    INSERT INTO pass_types (pass_id, pass_type, cost)
    VALUES (?, ?, ?)
    ON CONFLICT(pass_id) DO UPDATE SET
        pass_type = excluded.pass_type,
        cost = excluded.cost
"#;

/// Result of a local (non-CRM) issuance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuedPasses {
    pub event_id: String,
    pub pass_ids: Vec<i64>,
    pub issued_total: i64,
    pub remaining: i64,
}

enum Stored {
    Pass(i64),
    OverQuota { issued: i64 },
}

enum PassOutcome {
    Synced { pass_id: i64, type_stored: bool },
    OverQuota { issued: i64 },
    Failed(Error),
}

/// Mirrors CRM parking passes into `parking_passes` / `pass_types`, subject
/// to the per-event quota
#[derive(Clone)]
pub struct ParkingPassSyncService {
    db: Arc<Database>,
    crm: Arc<dyn CrmClient>,
    quota: ParkingQuota,
    publisher: StatusPublisher,
}

impl ParkingPassSyncService {
    pub fn new(db: Arc<Database>, crm: Arc<dyn CrmClient>, quota: ParkingQuota) -> Self {
        Self {
            db,
            crm,
            quota,
            publisher: StatusPublisher::default(),
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.publisher = StatusPublisher::new(Some(broker));
        self
    }

    pub fn quota(&self) -> ParkingQuota {
        self.quota
    }

    pub async fn sync_parking_passes(&self, range: &DateRange) -> SyncReport {
        info!(start_date = %range.start_date, end_date = %range.end_date, "Starting parking passes sync");

        let passes = match self.crm.get_parking_passes(range).await {
            Ok(passes) => passes,
            Err(e) => {
                error!(range = %range, error = %e, "Failed to fetch parking passes");
                Vec::new()
            }
        };

        if passes.is_empty() {
            error!(range = %range, "No parking pass data returned");
            self.publisher
                .publish(SyncStatusEvent::parking_passes_empty(*range))
                .await;
            return SyncReport::aborted("no parking pass data returned");
        }

        let mut success_count = 0;
        let mut failed_count = 0;

        for pass in &passes {
            match self.sync_one(pass).await {
                PassOutcome::Synced {
                    pass_id,
                    type_stored: true,
                } => {
                    success_count += 1;
                    self.publisher
                        .publish(SyncStatusEvent::ParkingPassSynced {
                            parking_pass_id: pass_id,
                            event_id: pass.event_id.clone(),
                            status: SyncStatus::Success,
                            pass_type: pass.pass_type.clone(),
                        })
                        .await;
                }
                PassOutcome::Synced {
                    pass_id,
                    type_stored: false,
                } => {
                    // The pass itself is stored, so it still counts
                    success_count += 1;
                    warn!(pass_id, "Parking pass stored but its type was not");
                    self.publisher
                        .publish(SyncStatusEvent::ParkingPassTypeSyncFailed {
                            parking_pass_id: pass_id,
                            event_id: pass.event_id.clone(),
                            status: SyncStatus::PartialFailure,
                        })
                        .await;
                }
                PassOutcome::OverQuota { issued } => {
                    failed_count += 1;
                    warn!(
                        event_id = %pass.event_id,
                        issued,
                        limit = self.quota.limit(),
                        "Parking pass quota exceeded"
                    );
                    self.publisher
                        .publish(SyncStatusEvent::ParkingPassQuotaExceeded {
                            event_id: pass.event_id.clone(),
                            issued,
                            limit: self.quota.limit(),
                            status: SyncStatus::Failed,
                        })
                        .await;
                }
                PassOutcome::Failed(e) => {
                    failed_count += 1;
                    error!(event_id = %pass.event_id, error = %e, "Failed to store parking pass");
                    self.publisher
                        .publish(SyncStatusEvent::ParkingPassSyncFailed {
                            event_id: pass.event_id.clone(),
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
            "Parking passes sync finished"
        );

        self.publisher
            .publish(SyncStatusEvent::ParkingPassSyncCompleted {
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

    async fn sync_one(&self, pass: &CrmParkingPass) -> PassOutcome {
        if let Err(e) = pass.validate() {
            return PassOutcome::Failed(e);
        }

        let stored = match self.db.begin_immediate().await {
            Ok(mut conn) => {
                let result = self.store_within_quota(&mut conn, pass).await;
                finish_immediate(conn, result).await
            }
            Err(e) => Err(e),
        };

        let pass_id = match stored {
            Ok(Stored::Pass(id)) => id,
            Ok(Stored::OverQuota { issued }) => return PassOutcome::OverQuota { issued },
            Err(e) => return PassOutcome::Failed(e),
        };

        let type_stored = match &pass.pass_type {
            Some(pass_type) => self.upsert_pass_type(pass_id, pass_type, pass.cost).await,
            None => true,
        };

        PassOutcome::Synced {
            pass_id,
            type_stored,
        }
    }

    /// Key lookup, quota check and upsert, run inside the caller's
    /// immediate transaction
    async fn store_within_quota(
        &self,
        conn: &mut SqliteConnection,
        pass: &CrmParkingPass,
    ) -> Result<Stored> {
        let key = pass.external_key();

        // Re-synced passes are updates and never count against the quota
        let existing: Option<i64> = sqlx::query_scalar(FIND_BY_KEY)
            .bind(&key)
            .fetch_optional(&mut *conn)
            .await?;

        if existing.is_none() {
            let issued: i64 = sqlx::query_scalar(COUNT_FOR_EVENT)
                .bind(&pass.event_id)
                .fetch_one(&mut *conn)
                .await?;
            if self.quota.check(issued, 1).is_err() {
                return Ok(Stored::OverQuota { issued });
            }
        }

        let upserted: Option<i64> = sqlx::query_scalar(UPSERT_PASS)
            .bind(&key)
            .bind(&pass.event_id)
            .bind(&pass.issued_at)
            .fetch_optional(&mut *conn)
            .await?;

        let pass_id = match upserted {
            Some(id) => Some(id),
            None => {
                sqlx::query_scalar(FIND_BY_KEY)
                    .bind(&key)
                    .fetch_optional(&mut *conn)
                    .await?
            }
        };

        pass_id
            .map(Stored::Pass)
            .ok_or_else(|| Error::Internal(format!("parking pass {} upsert returned no id", key)))
    }

    async fn upsert_pass_type(&self, pass_id: i64, pass_type: &str, cost: Option<f64>) -> bool {
        let params: Vec<SqlParam> = vec![
            pass_id.into(),
            pass_type.into(),
            cost.unwrap_or(0.0).into(),
        ];

        match self.db.execute(UPSERT_PASS_TYPE, &params).await {
            Ok(outcome) => outcome.wrote(),
            Err(_) => false,
        }
    }

    /// Issue `quantity` passes for a synced event outside the CRM
    ///
    /// Runs in one transaction: either every pass is issued or none is.
    pub async fn issue_local(
        &self,
        event_id: &str,
        pass_type: Option<&str>,
        cost: Option<f64>,
        quantity: i64,
    ) -> Result<IssuedPasses> {
        if quantity <= 0 {
            return Err(Error::InvalidInput("quantity must be positive".to_string()));
        }

        let mut conn = self.db.begin_immediate().await?;
        let result = self
            .issue_locked(&mut conn, event_id, pass_type, cost, quantity)
            .await;
        let (issued, pass_ids) = finish_immediate(conn, result).await?;

        let issued_total = issued + quantity;
        info!(event_id = %event_id, quantity, issued_total, "Parking passes issued");

        Ok(IssuedPasses {
            event_id: event_id.to_string(),
            pass_ids,
            issued_total,
            remaining: self.quota.remaining(issued_total),
        })
    }

    /// Returns the count before issuing and the new pass ids
    async fn issue_locked(
        &self,
        conn: &mut SqliteConnection,
        event_id: &str,
        pass_type: Option<&str>,
        cost: Option<f64>,
        quantity: i64,
    ) -> Result<(i64, Vec<i64>)> {
        let known: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE altru_event_id = ?")
                .bind(event_id)
                .fetch_one(&mut *conn)
                .await?;
        if known == 0 {
            return Err(Error::NotFound(format!("event {}", event_id)));
        }

        let issued: i64 = sqlx::query_scalar(COUNT_FOR_EVENT)
            .bind(event_id)
            .fetch_one(&mut *conn)
            .await?;
        self.quota.check(issued, quantity)?;

        let issued_at = Utc::now().to_rfc3339();
        let mut pass_ids = Vec::with_capacity(quantity as usize);

        for _ in 0..quantity {
            let pass_id: i64 = sqlx::query_scalar(
                "INSERT INTO parking_passes (event_id, issued_at) VALUES (?, ?) RETURNING id",
            )
            .bind(event_id)
            .bind(&issued_at)
            .fetch_one(&mut *conn)
            .await?;

            if let Some(pass_type) = pass_type {
                sqlx::query("INSERT INTO pass_types (pass_id, pass_type, cost) VALUES (?, ?, ?)")
                    .bind(pass_id)
                    .bind(pass_type)
                    .bind(cost.unwrap_or(0.0))
                    .execute(&mut *conn)
                    .await?;
            }
            pass_ids.push(pass_id);
        }

        Ok((issued, pass_ids))
    }
}
