//! Per-event parking pass limit

use thiserror::Error;

/// Issuing `requested` more passes would exceed the event's limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("parking quota exceeded: {issued} issued, {requested} requested, limit {limit}")]
pub struct QuotaExceeded {
    pub issued: i64,
    pub requested: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParkingQuota {
    limit: i64,
}

impl ParkingQuota {
    pub fn new(limit: i64) -> Self {
        Self {
            limit: limit.max(0),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Passes can still be issued
    pub fn remaining(&self, issued: i64) -> i64 {
        (self.limit - issued).max(0)
    }

    pub fn check(&self, issued: i64, requested: i64) -> Result<(), QuotaExceeded> {
        if issued.saturating_add(requested) > self.limit {
            return Err(QuotaExceeded {
                issued,
                requested,
                limit: self.limit,
            });
        }
        Ok(())
    }
}
