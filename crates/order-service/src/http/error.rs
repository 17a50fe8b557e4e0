//! HTTP 错误响应
//!
//! 调用方只会看到三种结果：找到、不存在、内部错误。内部细节只记录日志。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::OrderError;

#[derive(Debug)]
pub enum ApiError {
    NotFound { order_uid: String },
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ORDER_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound { order_uid } => Self::NotFound { order_uid },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::NotFound { order_uid } => format!("订单不存在: {order_uid}"),
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "订单查询内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
