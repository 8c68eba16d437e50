//! Read-only views over the local mirror

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use msync_common::db::reports::{self, EventReportRow, Inventory, Registrant};
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct EventReportResponse {
    pub events: Vec<EventReportRow>,
}

#[derive(Debug, Serialize)]
pub struct RegistrantsResponse {
    pub event_id: String,
    pub registrants: Vec<Registrant>,
}

/// GET /inventory
pub async fn get_inventory(State(state): State<AppState>) -> ApiResult<Json<Inventory>> {
    Ok(Json(reports::inventory(&state.db).await?))
}

/// GET /reports/events
pub async fn get_event_report(
    State(state): State<AppState>,
) -> ApiResult<Json<EventReportResponse>> {
    let events = reports::event_report(&state.db).await?;
    Ok(Json(EventReportResponse { events }))
}

/// GET /events/:event_id/registrants
pub async fn get_event_registrants(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<RegistrantsResponse>> {
    let registrants = reports::registrants(&state.db, &event_id).await?;
    Ok(Json(RegistrantsResponse {
        event_id,
        registrants,
    }))
}

/// Build report routes
pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/inventory", get(get_inventory))
        .route("/reports/events", get(get_event_report))
        .route("/events/:event_id/registrants", get(get_event_registrants))
}
