//! # msync common library
//!
//! Shared code for the museum sync services:
//! - Configuration loading (TOML + environment)
//! - Database service with connect retry and a generic query executor
//! - Message broker abstraction (in-memory and AMQP)
//! - Queue message types (sync requests and status events)
//! - CRM client trait and HTTP implementation
//! - Per-entity sync services and the daily scheduler

pub mod broker;
pub mod config;
pub mod crm;
pub mod db;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod sync;

pub use error::{Error, Result};
