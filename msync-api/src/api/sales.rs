//! Sales entry

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::db::sales::{self, Sale};
use crate::error::ApiResult;
use crate::AppState;

/// POST /sales request
#[derive(Debug, Deserialize)]
pub struct RecordSaleRequest {
    pub customer_id: i64,
    pub event_id: String,
    pub amount: f64,
}

/// POST /sales
pub async fn record_sale(
    State(state): State<AppState>,
    payload: Result<Json<RecordSaleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Sale>)> {
    let Json(request) = payload?;
    let sale = sales::record_sale(
        &state.db,
        request.customer_id,
        request.event_id.trim(),
        request.amount,
    )
    .await?;

    tracing::info!(sale_id = sale.sale_id, customer_id = sale.customer_id, "Sale recorded");
    Ok((StatusCode::CREATED, Json(sale)))
}

/// Build sales routes
pub fn sales_routes() -> Router<AppState> {
    Router::new().route("/sales", post(record_sale))
}
