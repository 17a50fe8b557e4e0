//! HTTP 请求处理器

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use super::error::ApiError;
use crate::models::Order;
use crate::state::AppState;

/// 按订单号查询订单
///
/// GET /order/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> Result<Json<Arc<Order>>, ApiError> {
    let order = state.lookup.find_by_id(&order_uid).await?;
    Ok(Json(order))
}

/// 服务器当前时间
///
/// GET /time
pub async fn current_time() -> Json<Value> {
    Json(json!({ "time": Utc::now().to_rfc3339() }))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// 就绪检查，存储不可达时返回 503
///
/// GET /ready
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => {
            warn!(error = %e, "就绪检查失败");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
