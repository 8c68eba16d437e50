//! msync-api library: HTTP surface for triggering syncs and reading the
//! local mirror

use axum::Router;
use msync_common::broker::MessageBroker;
use msync_common::db::Database;
use msync_common::sync::SyncServices;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub services: SyncServices,
    /// When set, sync requests are queued for the worker; otherwise they run
    /// as background tasks in this process
    pub broker: Option<Arc<dyn MessageBroker>>,
}

impl AppState {
    pub fn new(
        db: Arc<Database>,
        services: SyncServices,
        broker: Option<Arc<dyn MessageBroker>>,
    ) -> Self {
        Self {
            db,
            services,
            broker,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::sync_routes())
        .merge(api::parking_routes())
        .merge(api::report_routes())
        .merge(api::sales_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
