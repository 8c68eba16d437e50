//! HTTP API handlers for msync-api

pub mod health;
pub mod parking;
pub mod reports;
pub mod sales;
pub mod sync;

pub use health::health_routes;
pub use parking::parking_routes;
pub use reports::report_routes;
pub use sales::sales_routes;
pub use sync::sync_routes;
