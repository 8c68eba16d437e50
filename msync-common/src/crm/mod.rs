//! CRM client
//!
//! The sync services only see the [`CrmClient`] trait. [`HttpCrmClient`]
//! talks to the REST API; [`InMemoryCrm`] serves canned records.

mod http;
mod memory;
mod models;

pub use http::HttpCrmClient;
pub use memory::InMemoryCrm;
pub use models::{Constituent, Coordinator, CrmEvent, CrmParkingPass, Ticket};

use crate::events::DateRange;
use crate::Result;
use async_trait::async_trait;

/// Read access to the CRM records we mirror locally
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Look up one constituent; `Ok(None)` when the CRM has no such id
    async fn get_constituent(&self, altru_id: &str) -> Result<Option<Constituent>>;

    /// Events starting within the range
    async fn get_events(&self, range: &DateRange) -> Result<Vec<CrmEvent>>;

    /// Ticket (wristband) sales within the range
    async fn get_tickets(&self, range: &DateRange) -> Result<Vec<Ticket>>;

    /// Parking passes issued within the range
    async fn get_parking_passes(&self, range: &DateRange) -> Result<Vec<CrmParkingPass>>;
}
