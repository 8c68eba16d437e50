//! Local parking pass issuance
//!
//! POST /parking/tickets issues passes for an already-synced event, subject
//! to the same per-event quota the sync enforces.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use msync_common::sync::IssuedPasses;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /parking/tickets request
#[derive(Debug, Deserialize)]
pub struct IssueTicketsRequest {
    pub event_id: String,
    pub pass_type: Option<String>,
    pub cost: Option<f64>,
    pub quantity: i64,
}

/// POST /parking/tickets
///
/// 201 with the new pass ids; 404 for an unknown event; 409 when the quota
/// would be exceeded (nothing is issued in that case).
pub async fn issue_tickets(
    State(state): State<AppState>,
    payload: Result<Json<IssueTicketsRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IssuedPasses>)> {
    let Json(request) = payload?;

    let event_id = request.event_id.trim();
    if event_id.is_empty() {
        return Err(ApiError::BadRequest("event_id is required".to_string()));
    }
    if let Some(cost) = request.cost {
        if !cost.is_finite() || cost < 0.0 {
            return Err(ApiError::BadRequest("cost must be zero or more".to_string()));
        }
    }

    let issued = state
        .services
        .parking_passes
        .issue_local(
            event_id,
            request.pass_type.as_deref(),
            request.cost,
            request.quantity,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// Build parking routes
pub fn parking_routes() -> Router<AppState> {
    Router::new().route("/parking/tickets", post(issue_tickets))
}
