//! Sync trigger endpoints
//!
//! POST /sync/customer, /sync/events, /sync/wristbands, /sync/parkingpasses,
//! /sync/all. Input is validated up front; the sync itself runs elsewhere:
//! - with a broker, the request is queued on `sync_queue` for the worker
//! - without one, it runs as a background task in this process
//!
//! Either way the caller gets 202 Accepted immediately.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use msync_common::broker::publish_json;
use msync_common::db::sync_log::{self, SyncLogEntry};
use msync_common::events::{DateRange, SyncRequest, SYNC_QUEUE};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

const DEFAULT_LOG_LIMIT: i64 = 50;
const MAX_LOG_LIMIT: i64 = 500;

/// POST /sync/customer request
#[derive(Debug, Deserialize)]
pub struct CustomerSyncBody {
    pub altru_id: Option<String>,
}

/// Date window for the range-based endpoints
#[derive(Debug, Default, Deserialize)]
pub struct DateRangeBody {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl DateRangeBody {
    fn required(&self) -> ApiResult<DateRange> {
        match (&self.start_date, &self.end_date) {
            (Some(start), Some(end)) => Ok(DateRange::parse(start, end)?),
            _ => Err(ApiError::BadRequest(
                "start_date and end_date are required".to_string(),
            )),
        }
    }

    /// Both dates or neither
    fn optional(&self) -> ApiResult<Option<DateRange>> {
        match (&self.start_date, &self.end_date) {
            (None, None) => Ok(None),
            _ => self.required().map(Some),
        }
    }
}

/// 202 response for every sync endpoint
#[derive(Debug, Serialize)]
pub struct SyncAccepted {
    pub status: &'static str,
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub request_type: &'static str,
    /// `queued` (broker) or `background` (in-process task)
    pub dispatch: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SyncLogQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SyncLogResponse {
    pub entries: Vec<SyncLogEntry>,
}

/// Queue or spawn a validated request
async fn submit(state: &AppState, request: SyncRequest) -> ApiResult<(StatusCode, Json<SyncAccepted>)> {
    let job_id = Uuid::new_v4();

    let dispatch = match &state.broker {
        Some(broker) => {
            publish_json(broker.as_ref(), SYNC_QUEUE, &request).await?;
            info!(job_id = %job_id, request_type = request.type_name(), "Sync request queued");
            "queued"
        }
        None => {
            let services = state.services.clone();
            let background = request.clone();
            tokio::spawn(async move {
                info!(job_id = %job_id, request_type = background.type_name(), "Background sync started");
                let outcome = services.dispatch(&background).await;
                if outcome.is_success() {
                    info!(job_id = %job_id, "Background sync completed");
                } else {
                    error!(job_id = %job_id, reports = ?outcome.reports, "Background sync finished with failures");
                }
            });
            "background"
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncAccepted {
            status: "accepted",
            job_id,
            request_type: request.type_name(),
            dispatch,
        }),
    ))
}

/// POST /sync/customer
pub async fn sync_customer(
    State(state): State<AppState>,
    payload: Result<Json<CustomerSyncBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SyncAccepted>)> {
    let Json(body) = payload?;
    let altru_id = body
        .altru_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("altru_id is required".to_string()))?;

    submit(&state, SyncRequest::CustomerSync { altru_id: Some(altru_id) }).await
}

/// POST /sync/events
pub async fn sync_events(
    State(state): State<AppState>,
    payload: Result<Json<DateRangeBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SyncAccepted>)> {
    let Json(body) = payload?;
    submit(&state, SyncRequest::EventSync(body.required()?)).await
}

/// POST /sync/wristbands
pub async fn sync_wristbands(
    State(state): State<AppState>,
    payload: Result<Json<DateRangeBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SyncAccepted>)> {
    let Json(body) = payload?;
    submit(&state, SyncRequest::WristbandSync(body.required()?)).await
}

/// POST /sync/parkingpasses
pub async fn sync_parking_passes(
    State(state): State<AppState>,
    payload: Result<Json<DateRangeBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SyncAccepted>)> {
    let Json(body) = payload?;
    submit(&state, SyncRequest::ParkingPassSync(body.required()?)).await
}

/// POST /sync/all
///
/// The body is optional; without dates the sync covers today. A body that is
/// present must be a valid date range object.
pub async fn sync_all(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SyncAccepted>)> {
    let body = parse_optional_body(&body)?;
    submit(&state, SyncRequest::full(body.optional()?)).await
}

/// Empty (or whitespace-only) body means no dates
fn parse_optional_body(body: &[u8]) -> ApiResult<DateRangeBody> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DateRangeBody::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// GET /sync/log?limit=
pub async fn get_sync_log(
    State(state): State<AppState>,
    query: Result<Query<SyncLogQuery>, QueryRejection>,
) -> ApiResult<Json<SyncLogResponse>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if !(1..=MAX_LOG_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LOG_LIMIT
        )));
    }

    let entries = sync_log::recent(&state.db, limit).await?;
    Ok(Json(SyncLogResponse { entries }))
}

/// Build sync routes
pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/sync/customer", post(sync_customer))
        .route("/sync/events", post(sync_events))
        .route("/sync/wristbands", post(sync_wristbands))
        .route("/sync/parkingpasses", post(sync_parking_passes))
        .route("/sync/all", post(sync_all))
        .route("/sync/log", get(get_sync_log))
}
