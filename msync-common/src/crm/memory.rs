//! Canned-data [`CrmClient`] for tests and offline runs

use super::{Constituent, CrmClient, CrmEvent, CrmParkingPass, Ticket};
use crate::events::DateRange;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Serves whatever records it was loaded with, regardless of date range
#[derive(Default)]
pub struct InMemoryCrm {
    constituents: RwLock<HashMap<String, Constituent>>,
    events: RwLock<Vec<CrmEvent>>,
    tickets: RwLock<Vec<Ticket>>,
    parking_passes: RwLock<Vec<CrmParkingPass>>,
    unavailable: AtomicBool,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constituent(self, altru_id: &str, constituent: Constituent) -> Self {
        if let Ok(mut map) = self.constituents.write() {
            map.insert(altru_id.to_string(), constituent);
        }
        self
    }

    pub fn with_events(self, events: Vec<CrmEvent>) -> Self {
        self.set_events(events);
        self
    }

    pub fn with_tickets(self, tickets: Vec<Ticket>) -> Self {
        if let Ok(mut list) = self.tickets.write() {
            *list = tickets;
        }
        self
    }

    pub fn with_parking_passes(self, passes: Vec<CrmParkingPass>) -> Self {
        if let Ok(mut list) = self.parking_passes.write() {
            *list = passes;
        }
        self
    }

    pub fn set_events(&self, events: Vec<CrmEvent>) {
        if let Ok(mut list) = self.events.write() {
            *list = events;
        }
    }

    /// Make every call fail as if the CRM were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Crm("HTTP 503: service unavailable".to_string()));
        }
        Ok(())
    }
}

fn read<T: Clone>(lock: &RwLock<T>) -> Result<T> {
    lock.read()
        .map(|guard| guard.clone())
        .map_err(|e| Error::Internal(format!("fake CRM lock poisoned: {}", e)))
}

#[async_trait]
impl CrmClient for InMemoryCrm {
    async fn get_constituent(&self, altru_id: &str) -> Result<Option<Constituent>> {
        self.check_available()?;
        Ok(read(&self.constituents)?.remove(altru_id))
    }

    async fn get_events(&self, _range: &DateRange) -> Result<Vec<CrmEvent>> {
        self.check_available()?;
        read(&self.events)
    }

    async fn get_tickets(&self, _range: &DateRange) -> Result<Vec<Ticket>> {
        self.check_available()?;
        read(&self.tickets)
    }

    async fn get_parking_passes(&self, _range: &DateRange) -> Result<Vec<CrmParkingPass>> {
        self.check_available()?;
        read(&self.parking_passes)
    }
}
