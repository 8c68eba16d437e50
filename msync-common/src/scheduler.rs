//! Daily sync scheduler
//!
//! Once a day at `scheduler.daily_at` (local time) the scheduler either queues
//! one request per registered sync kind on `sync_queue`, or, with no broker,
//! runs the services in-process.

use crate::broker::{publish_json, MessageBroker};
use crate::config::{ScheduleTime, SchedulerConfig};
use crate::events::{DateRange, SchedulerNotice, SyncKind, SyncRequest, SYNC_QUEUE};
use crate::sync::SyncServices;
use crate::Result;
use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// First `at` wall-clock time strictly after `now`
pub fn next_run_after(now: NaiveDateTime, at: ScheduleTime) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(at.hour, at.minute, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(time);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

pub struct SchedulerService {
    services: SyncServices,
    broker: Option<Arc<dyn MessageBroker>>,
    daily_at: ScheduleTime,
    default_altru_id: String,
    /// Ordered customer → event → wristband → parking_pass
    registered: BTreeSet<SyncKind>,
}

impl SchedulerService {
    pub fn new(
        services: SyncServices,
        broker: Option<Arc<dyn MessageBroker>>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            services,
            broker,
            daily_at: config.daily_at,
            default_altru_id: config.default_altru_id.clone(),
            registered: BTreeSet::new(),
        }
    }

    pub fn register(mut self, kind: SyncKind) -> Self {
        self.registered.insert(kind);
        self
    }

    pub fn register_all(self) -> Self {
        SyncKind::ALL.into_iter().fold(self, Self::register)
    }

    pub fn registered(&self) -> Vec<SyncKind> {
        self.registered.iter().copied().collect()
    }

    /// Run the daily fan-out for today
    pub async fn daily_sync(&self) -> Result<()> {
        self.daily_sync_for(Local::now().date_naive()).await
    }

    /// Run the fan-out for `day`, covering `day` through the next day
    pub async fn daily_sync_for(&self, day: NaiveDate) -> Result<()> {
        let range = DateRange::day_and_next(day);
        info!(date = %day, kinds = self.registered.len(), "Starting daily sync");

        match &self.broker {
            Some(broker) => {
                let broker = broker.as_ref();
                publish_json(broker, SYNC_QUEUE, &SchedulerNotice::DailySyncStarted { date: day })
                    .await?;

                for kind in &self.registered {
                    let request =
                        SyncRequest::for_kind(*kind, range, Some(self.default_altru_id.clone()));
                    publish_json(broker, SYNC_QUEUE, &request).await?;
                }

                publish_json(broker, SYNC_QUEUE, &SchedulerNotice::DailySyncScheduled { date: day })
                    .await?;
                info!(date = %day, "Daily sync requests queued");
            }
            None => {
                for kind in &self.registered {
                    let report = self.services.run_kind(*kind, &range).await;
                    if report.is_success() {
                        debug!(kind = %kind, total = report.total, "Scheduled sync succeeded");
                    } else {
                        warn!(
                            kind = %kind,
                            failed = report.failed_count,
                            error = report.error.as_deref().unwrap_or(""),
                            "Scheduled sync reported failures"
                        );
                    }
                }
                info!(date = %day, "Daily sync completed");
            }
        }

        Ok(())
    }

    /// Run `daily_sync` at every `daily_at` until `shutdown` fires
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(daily_at = %self.daily_at, "Scheduler started");

            loop {
                let now = Local::now().naive_local();
                let next = next_run_after(now, self.daily_at);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                debug!(next_run = %next, "Next daily sync");

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Scheduler stopped");
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {
                        if let Err(e) = self.daily_sync().await {
                            error!(error = %e, "Daily sync failed");
                        }
                    }
                }
            }
        })
    }
}
