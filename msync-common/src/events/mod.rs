//! Queue message types
//!
//! Everything that travels over the broker is JSON:
//! - [`SyncRequest`] on `sync_queue`, tagged by `type`
//! - [`SchedulerNotice`] on `sync_queue`, tagged by `event`
//! - [`SyncStatusEvent`] on the per-entity queues, tagged by `event`

mod requests;
mod status;

pub use requests::{SchedulerNotice, SyncKind, SyncRequest};
pub use status::{SyncStatus, SyncStatusEvent};

use crate::{Error, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Work requests from the API and scheduler
pub const SYNC_QUEUE: &str = "sync_queue";
pub const CUSTOMER_EVENTS_QUEUE: &str = "customer_sync_events";
pub const EVENT_EVENTS_QUEUE: &str = "event_sync_events";
pub const WRISTBAND_EVENTS_QUEUE: &str = "wristband_sync_events";
pub const PARKING_PASS_EVENTS_QUEUE: &str = "parking_pass_sync_events";

/// Every queue the worker consumes, `sync_queue` first
pub const ALL_QUEUES: [&str; 5] = [
    SYNC_QUEUE,
    CUSTOMER_EVENTS_QUEUE,
    EVENT_EVENTS_QUEUE,
    WRISTBAND_EVENTS_QUEUE,
    PARKING_PASS_EVENTS_QUEUE,
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive date window passed to the CRM list endpoints
///
/// Serialized as `{"start_date": "YYYY-MM-DD", "end_date": "YYYY-MM-DD"}`.
/// Deserialization rejects a window whose start is after its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = Error;

    fn try_from(raw: RawDateRange) -> Result<Self> {
        DateRange::new(raw.start_date, raw.end_date)
    }
}

impl DateRange {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self> {
        if start_date > end_date {
            return Err(Error::InvalidInput(format!(
                "start_date {} is after end_date {}",
                start_date, end_date
            )));
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    /// Parse two `YYYY-MM-DD` strings
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start_date = parse_date("start_date", start)?;
        let end_date = parse_date("end_date", end)?;
        Self::new(start_date, end_date)
    }

    /// The given day through the following day
    pub fn day_and_next(day: NaiveDate) -> Self {
        Self {
            start_date: day,
            end_date: day.succ_opt().unwrap_or(day),
        }
    }

    /// Today through tomorrow, local time
    pub fn today() -> Self {
        Self::day_and_next(Local::now().date_naive())
    }

    /// A window covering only `day`
    pub fn single_day(day: NaiveDate) -> Self {
        Self {
            start_date: day,
            end_date: day,
        }
    }

    pub fn start_str(&self) -> String {
        self.start_date.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end_date.format(DATE_FORMAT).to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start_str(), self.end_str())
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        Error::InvalidInput(format!("{} must be YYYY-MM-DD, got '{}'", field, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_parse_valid_range() {
        let range = DateRange::parse("2025-03-01", "2025-03-02").unwrap();
        assert_eq!(range.start_date, date("2025-03-01"));
        assert_eq!(range.end_str(), "2025-03-02");
        assert_eq!(range.to_string(), "2025-03-01 to 2025-03-02");
    }

    #[test]
    fn test_parse_same_day_is_valid() {
        assert!(DateRange::parse("2025-03-01", "2025-03-01").is_ok());
    }

    #[test]
    fn test_parse_rejects_reversed_range() {
        let err = DateRange::parse("2025-03-02", "2025-03-01").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_parse_rejects_bad_format() {
        assert!(DateRange::parse("03/01/2025", "2025-03-02").is_err());
        assert!(DateRange::parse("2025-02-30", "2025-03-02").is_err());
        assert!(DateRange::parse("", "2025-03-02").is_err());
    }

    #[test]
    fn test_day_and_next_crosses_year() {
        let range = DateRange::day_and_next(date("2024-12-31"));
        assert_eq!(range.end_date, date("2025-01-01"));
    }

    #[test]
    fn test_deserialize_rejects_reversed_range() {
        let ok: DateRange =
            serde_json::from_value(json!({"start_date": "2025-01-01", "end_date": "2025-01-02"}))
                .unwrap();
        assert_eq!(ok.start_str(), "2025-01-01");

        let reversed = serde_json::from_value::<DateRange>(
            json!({"start_date": "2025-01-02", "end_date": "2025-01-01"}),
        );
        assert!(reversed.is_err());
    }
}
