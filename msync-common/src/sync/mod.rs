//! CRM → local database sync services
//!
//! Every service follows the same loop: fetch records for a key or date
//! range, upsert each one, publish a per-record status event, then publish a
//! summary. Failures never abort a run; they are counted in the returned
//! [`SyncReport`] and logged.

mod customers;
mod events;
mod parking_passes;
mod quota;
mod wristbands;

pub use customers::CustomerSyncService;
pub use events::EventSyncService;
pub use parking_passes::{IssuedPasses, ParkingPassSyncService};
pub use quota::{ParkingQuota, QuotaExceeded};
pub use wristbands::WristbandSyncService;

use crate::broker::{publish_json, MessageBroker};
use crate::config::AppConfig;
use crate::crm::CrmClient;
use crate::db::Database;
use crate::events::{DateRange, SyncKind, SyncRequest, SyncStatusEvent};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Counts from one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub success_count: usize,
    pub failed_count: usize,
    pub total: usize,
    /// Set when the run stopped before processing any record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    pub fn from_counts(success_count: usize, failed_count: usize) -> Self {
        Self {
            success_count,
            failed_count,
            total: success_count + failed_count,
            error: None,
        }
    }

    /// Run that had nothing to process (fetch failed or came back empty)
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_count == 0 && self.error.is_none()
    }
}

/// Reports for every sync a request triggered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub request_type: &'static str,
    pub reports: Vec<(SyncKind, SyncReport)>,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        self.reports.iter().all(|(_, report)| report.is_success())
    }
}

/// Publishes status events when a broker is attached; a no-op otherwise
#[derive(Clone, Default)]
pub(crate) struct StatusPublisher {
    broker: Option<Arc<dyn MessageBroker>>,
}

impl StatusPublisher {
    pub(crate) fn new(broker: Option<Arc<dyn MessageBroker>>) -> Self {
        Self { broker }
    }

    /// Publish failures are logged by `publish_json` and do not fail the sync
    pub(crate) async fn publish(&self, event: SyncStatusEvent) {
        if let Some(broker) = &self.broker {
            let _ = publish_json(broker.as_ref(), event.queue(), &event).await;
        }
    }
}

/// The four sync services behind one dispatcher
#[derive(Clone)]
pub struct SyncServices {
    pub customers: CustomerSyncService,
    pub events: EventSyncService,
    pub wristbands: WristbandSyncService,
    pub parking_passes: ParkingPassSyncService,
    default_altru_id: String,
}

impl SyncServices {
    pub fn new(
        db: Arc<Database>,
        crm: Arc<dyn CrmClient>,
        broker: Option<Arc<dyn MessageBroker>>,
        config: &AppConfig,
    ) -> Self {
        let quota = ParkingQuota::new(config.parking.max_passes_per_event);

        let mut services = Self {
            customers: CustomerSyncService::new(db.clone(), crm.clone()),
            events: EventSyncService::new(db.clone(), crm.clone()),
            wristbands: WristbandSyncService::new(db.clone(), crm.clone()),
            parking_passes: ParkingPassSyncService::new(db, crm, quota),
            default_altru_id: config.scheduler.default_altru_id.clone(),
        };

        if let Some(broker) = broker {
            services.customers = services.customers.with_broker(broker.clone());
            services.events = services.events.with_broker(broker.clone());
            services.wristbands = services.wristbands.with_broker(broker.clone());
            services.parking_passes = services.parking_passes.with_broker(broker);
        }

        services
    }

    pub fn default_altru_id(&self) -> &str {
        &self.default_altru_id
    }

    /// Run one entity's sync. Customer syncs ignore the range and use the
    /// default id.
    pub async fn run_kind(&self, kind: SyncKind, range: &DateRange) -> SyncReport {
        match kind {
            SyncKind::Customer => self.customers.sync_customer(&self.default_altru_id).await,
            SyncKind::Event => self.events.sync_events(range).await,
            SyncKind::Wristband => self.wristbands.sync_wristbands(range).await,
            SyncKind::ParkingPass => self.parking_passes.sync_parking_passes(range).await,
        }
    }

    /// Execute a queued request
    pub async fn dispatch(&self, request: &SyncRequest) -> SyncOutcome {
        info!(request_type = request.type_name(), "Dispatching sync request");

        let reports = match request {
            SyncRequest::CustomerSync { altru_id } => {
                let altru_id = altru_id
                    .as_deref()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or(&self.default_altru_id);
                vec![(SyncKind::Customer, self.customers.sync_customer(altru_id).await)]
            }
            SyncRequest::EventSync(range) => {
                vec![(SyncKind::Event, self.events.sync_events(range).await)]
            }
            SyncRequest::WristbandSync(range) => {
                vec![(SyncKind::Wristband, self.wristbands.sync_wristbands(range).await)]
            }
            SyncRequest::ParkingPassSync(range) => vec![(
                SyncKind::ParkingPass,
                self.parking_passes.sync_parking_passes(range).await,
            )],
            SyncRequest::FullSync {
                start_date,
                end_date,
            } => {
                let today = Local::now().date_naive();
                let start = start_date.unwrap_or(today);
                let end = end_date.unwrap_or(today);
                let range = match DateRange::new(start, end) {
                    Ok(range) => range,
                    Err(e) => {
                        warn!(error = %e, "Full sync has an invalid range; using today");
                        DateRange::single_day(today)
                    }
                };

                let mut reports = Vec::with_capacity(SyncKind::ALL.len());
                for kind in SyncKind::ALL {
                    reports.push((kind, self.run_kind(kind, &range).await));
                }
                reports
            }
        };

        let outcome = SyncOutcome {
            request_type: request.type_name(),
            reports,
        };
        if !outcome.is_success() {
            warn!(request_type = outcome.request_type, "Sync request finished with failures");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success_rules() {
        assert!(SyncReport::from_counts(3, 0).is_success());
        assert!(!SyncReport::from_counts(3, 1).is_success());
        assert_eq!(SyncReport::from_counts(3, 1).total, 4);

        let aborted = SyncReport::aborted("no data");
        assert_eq!(aborted.total, 0);
        assert!(!aborted.is_success());
    }
}
