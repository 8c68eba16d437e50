//! Messages carried on `sync_queue`

use super::{
    DateRange, CUSTOMER_EVENTS_QUEUE, EVENT_EVENTS_QUEUE, PARKING_PASS_EVENTS_QUEUE,
    WRISTBAND_EVENTS_QUEUE,
};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four syncable entities, in the order a full sync runs them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Customer,
    Event,
    Wristband,
    ParkingPass,
}

impl SyncKind {
    pub const ALL: [SyncKind; 4] = [
        SyncKind::Customer,
        SyncKind::Event,
        SyncKind::Wristband,
        SyncKind::ParkingPass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Customer => "customer",
            SyncKind::Event => "event",
            SyncKind::Wristband => "wristband",
            SyncKind::ParkingPass => "parking_pass",
        }
    }

    /// Queue that status events for this entity are published on
    pub fn events_queue(&self) -> &'static str {
        match self {
            SyncKind::Customer => CUSTOMER_EVENTS_QUEUE,
            SyncKind::Event => EVENT_EVENTS_QUEUE,
            SyncKind::Wristband => WRISTBAND_EVENTS_QUEUE,
            SyncKind::ParkingPass => PARKING_PASS_EVENTS_QUEUE,
        }
    }

    pub fn from_events_queue(queue: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.events_queue() == queue)
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown sync kind '{}'", s)))
    }
}

/// A unit of sync work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncRequest {
    CustomerSync {
        /// Falls back to the configured default id when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        altru_id: Option<String>,
    },
    EventSync(DateRange),
    WristbandSync(DateRange),
    ParkingPassSync(DateRange),
    /// All four syncs; dates default to today
    FullSync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<NaiveDate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<NaiveDate>,
    },
}

impl SyncRequest {
    /// Request that syncs `kind` over `range`
    pub fn for_kind(kind: SyncKind, range: DateRange, altru_id: Option<String>) -> Self {
        match kind {
            SyncKind::Customer => SyncRequest::CustomerSync { altru_id },
            SyncKind::Event => SyncRequest::EventSync(range),
            SyncKind::Wristband => SyncRequest::WristbandSync(range),
            SyncKind::ParkingPass => SyncRequest::ParkingPassSync(range),
        }
    }

    pub fn full(range: Option<DateRange>) -> Self {
        SyncRequest::FullSync {
            start_date: range.map(|r| r.start_date),
            end_date: range.map(|r| r.end_date),
        }
    }

    /// Wire name of the request, as in the `type` field
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncRequest::CustomerSync { .. } => "customer_sync",
            SyncRequest::EventSync(_) => "event_sync",
            SyncRequest::WristbandSync(_) => "wristband_sync",
            SyncRequest::ParkingPassSync(_) => "parking_pass_sync",
            SyncRequest::FullSync { .. } => "full_sync",
        }
    }

    /// Entity this request targets; `None` for a full sync
    pub fn kind(&self) -> Option<SyncKind> {
        match self {
            SyncRequest::CustomerSync { .. } => Some(SyncKind::Customer),
            SyncRequest::EventSync(_) => Some(SyncKind::Event),
            SyncRequest::WristbandSync(_) => Some(SyncKind::Wristband),
            SyncRequest::ParkingPassSync(_) => Some(SyncKind::ParkingPass),
            SyncRequest::FullSync { .. } => None,
        }
    }
}

/// Scheduler bookends around a daily fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerNotice {
    DailySyncStarted { date: NaiveDate },
    DailySyncScheduled { date: NaiveDate },
}
