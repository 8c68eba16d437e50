//! Queries owned by the HTTP service

pub mod sales;
