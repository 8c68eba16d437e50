//! Per-entity status events published by the sync services

use super::{DateRange, SyncKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
    PartialFailure,
    NoData,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::PartialFailure => "partial_failure",
            SyncStatus::NoData => "no_data",
        }
    }

    /// `success` when nothing failed, otherwise `partial_failure`
    pub fn from_failures(failed_count: usize) -> Self {
        if failed_count == 0 {
            SyncStatus::Success
        } else {
            SyncStatus::PartialFailure
        }
    }
}

/// Outcome of syncing one record, or summary of a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncStatusEvent {
    CustomerSynced {
        altru_id: String,
        status: SyncStatus,
    },
    CustomerSyncFailed {
        altru_id: String,
        status: SyncStatus,
    },

    EventSynced {
        event_id: String,
        status: SyncStatus,
        name: Option<String>,
    },
    EventSyncFailed {
        event_id: String,
        status: SyncStatus,
        name: Option<String>,
    },
    EventsSyncCompleted {
        start_date: NaiveDate,
        end_date: NaiveDate,
        success_count: usize,
        failed_count: usize,
        total: usize,
    },

    WristbandSynced {
        wristband_id: i64,
        event_id: String,
        status: SyncStatus,
    },
    WristbandSyncFailed {
        event_id: String,
        status: SyncStatus,
    },
    WristbandSyncEmpty {
        start_date: NaiveDate,
        end_date: NaiveDate,
        status: SyncStatus,
    },
    WristbandsSyncCompleted {
        start_date: NaiveDate,
        end_date: NaiveDate,
        success_count: usize,
        failed_count: usize,
        total: usize,
        status: SyncStatus,
    },

    ParkingPassSynced {
        parking_pass_id: i64,
        event_id: String,
        status: SyncStatus,
        pass_type: Option<String>,
    },
    ParkingPassSyncFailed {
        event_id: String,
        status: SyncStatus,
    },
    /// Pass row stored, pass type row not
    ParkingPassTypeSyncFailed {
        parking_pass_id: i64,
        event_id: String,
        status: SyncStatus,
    },
    ParkingPassQuotaExceeded {
        event_id: String,
        issued: i64,
        limit: i64,
        status: SyncStatus,
    },
    ParkingPassSyncEmpty {
        start_date: NaiveDate,
        end_date: NaiveDate,
        status: SyncStatus,
    },
    ParkingPassSyncCompleted {
        start_date: NaiveDate,
        end_date: NaiveDate,
        success_count: usize,
        failed_count: usize,
        total: usize,
        status: SyncStatus,
    },
}

impl SyncStatusEvent {
    pub fn wristbands_empty(range: DateRange) -> Self {
        SyncStatusEvent::WristbandSyncEmpty {
            start_date: range.start_date,
            end_date: range.end_date,
            status: SyncStatus::NoData,
        }
    }

    pub fn parking_passes_empty(range: DateRange) -> Self {
        SyncStatusEvent::ParkingPassSyncEmpty {
            start_date: range.start_date,
            end_date: range.end_date,
            status: SyncStatus::NoData,
        }
    }

    /// Entity the event reports on
    pub fn kind(&self) -> SyncKind {
        use SyncStatusEvent::*;
        match self {
            CustomerSynced { .. } | CustomerSyncFailed { .. } => SyncKind::Customer,
            EventSynced { .. } | EventSyncFailed { .. } | EventsSyncCompleted { .. } => {
                SyncKind::Event
            }
            WristbandSynced { .. }
            | WristbandSyncFailed { .. }
            | WristbandSyncEmpty { .. }
            | WristbandsSyncCompleted { .. } => SyncKind::Wristband,
            ParkingPassSynced { .. }
            | ParkingPassSyncFailed { .. }
            | ParkingPassTypeSyncFailed { .. }
            | ParkingPassQuotaExceeded { .. }
            | ParkingPassSyncEmpty { .. }
            | ParkingPassSyncCompleted { .. } => SyncKind::ParkingPass,
        }
    }

    /// Queue the event is published on
    pub fn queue(&self) -> &'static str {
        self.kind().events_queue()
    }

    /// Wire name, as in the `event` field
    pub fn name(&self) -> &'static str {
        use SyncStatusEvent::*;
        match self {
            CustomerSynced { .. } => "customer_synced",
            CustomerSyncFailed { .. } => "customer_sync_failed",
            EventSynced { .. } => "event_synced",
            EventSyncFailed { .. } => "event_sync_failed",
            EventsSyncCompleted { .. } => "events_sync_completed",
            WristbandSynced { .. } => "wristband_synced",
            WristbandSyncFailed { .. } => "wristband_sync_failed",
            WristbandSyncEmpty { .. } => "wristband_sync_empty",
            WristbandsSyncCompleted { .. } => "wristbands_sync_completed",
            ParkingPassSynced { .. } => "parking_pass_synced",
            ParkingPassSyncFailed { .. } => "parking_pass_sync_failed",
            ParkingPassTypeSyncFailed { .. } => "parking_pass_type_sync_failed",
            ParkingPassQuotaExceeded { .. } => "parking_pass_quota_exceeded",
            ParkingPassSyncEmpty { .. } => "parking_pass_sync_empty",
            ParkingPassSyncCompleted { .. } => "parking_pass_sync_completed",
        }
    }

    /// `None` only for `events_sync_completed`, which carries counts alone
    pub fn status(&self) -> Option<SyncStatus> {
        use SyncStatusEvent::*;
        match self {
            EventsSyncCompleted { .. } => None,
            CustomerSynced { status, .. }
            | CustomerSyncFailed { status, .. }
            | EventSynced { status, .. }
            | EventSyncFailed { status, .. }
            | WristbandSynced { status, .. }
            | WristbandSyncFailed { status, .. }
            | WristbandSyncEmpty { status, .. }
            | WristbandsSyncCompleted { status, .. }
            | ParkingPassSynced { status, .. }
            | ParkingPassSyncFailed { status, .. }
            | ParkingPassTypeSyncFailed { status, .. }
            | ParkingPassQuotaExceeded { status, .. }
            | ParkingPassSyncEmpty { status, .. }
            | ParkingPassSyncCompleted { status, .. } => Some(*status),
        }
    }
}
