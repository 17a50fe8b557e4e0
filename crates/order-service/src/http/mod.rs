//! HTTP 边界
//!
//! 查询端点只通过 `OrderLookupService::find_by_id` 访问订单。

mod error;
mod handlers;

pub use error::ApiError;

use std::time::Duration;

use axum::{Router, http::StatusCode, middleware, routing::get};
use order_shared::observability::middleware as obs_middleware;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;

/// 构建路由及中间件
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/order/{id}", get(handlers::get_order))
        .route("/time", get(handlers::current_time))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::OrderCache;
    use crate::lookup::OrderLookupService;
    use crate::store::{MockOrderStore, OrderStore};
    use crate::testing::{MemoryOrderStore, sample_order};

    fn app_with_store(store: Arc<dyn OrderStore>) -> Router {
        app_with_timeout(store, Duration::from_secs(4))
    }

    fn app_with_timeout(store: Arc<dyn OrderStore>, timeout: Duration) -> Router {
        let cache = Arc::new(OrderCache::new(4));
        let lookup = OrderLookupService::new(Arc::clone(&store), cache);
        router(AppState::new(lookup, store), timeout)
    }

    /// 查询永远不返回的存储
    struct StalledStore;

    #[async_trait::async_trait]
    impl OrderStore for StalledStore {
        async fn save(&self, _order: &crate::models::Order) -> crate::error::Result<()> {
            Ok(())
        }

        async fn get(&self, _order_uid: &str) -> crate::error::Result<Option<crate::models::Order>> {
            std::future::pending().await
        }

        async fn load_recent(&self, _limit: usize) -> crate::error::Result<Vec<crate::models::Order>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value, Option<String>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body, request_id)
    }

    #[tokio::test]
    async fn test_get_order_found() {
        let store = Arc::new(MemoryOrderStore::with_orders([sample_order("b563feb7b2b84b6test")]));
        let (status, body, request_id) = get(app_with_store(store), "/order/b563feb7b2b84b6test").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order_uid"], "b563feb7b2b84b6test");
        assert_eq!(body["items"][0]["name"], "Mascaras");
        assert!(request_id.is_some());
    }

    #[tokio::test]
    async fn test_get_order_not_found() {
        let store = Arc::new(MemoryOrderStore::new());
        let (status, body, _) = get(app_with_store(store), "/order/missing").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "ORDER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_get_order_internal_error_hides_details() {
        let mut store = MockOrderStore::new();
        store
            .expect_get()
            .returning(|_| Err(crate::error::OrderError::TransientStore("password=secret".into())));

        let (status, body, _) = get(app_with_store(Arc::new(store)), "/order/x").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(!body["message"].as_str().unwrap().contains("secret"));
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let app = app_with_timeout(Arc::new(StalledStore), Duration::from_millis(50));

        let (status, _, request_id) = get(app, "/order/stuck").await;

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert!(request_id.is_some());
    }

    #[tokio::test]
    async fn test_time_and_health() {
        let app = app_with_store(Arc::new(MemoryOrderStore::new()));

        let (status, body, _) = get(app.clone(), "/time").await;
        assert_eq!(status, StatusCode::OK);
        assert!(chrono::DateTime::parse_from_rfc3339(body["time"].as_str().unwrap()).is_ok());

        let (status, _, _) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_reports_store_failure() {
        let mut store = MockOrderStore::new();
        store
            .expect_ping()
            .returning(|| Err(crate::error::OrderError::TransientStore("down".into())));

        let (status, body, _) = get(app_with_store(Arc::new(store)), "/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_request_id_propagated() {
        let app = app_with_store(Arc::new(MemoryOrderStore::new()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "req-42");
    }
}
