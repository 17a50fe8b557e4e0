//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时（例如单元测试）所有记录函数都是空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(port: u16, service_name: &str) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "orders_ingested_total",
        "Orders persisted from the queue for the first time"
    );
    metrics::describe_counter!(
        "orders_duplicate_total",
        "Redelivered orders whose uid was already stored"
    );
    metrics::describe_counter!(
        "orders_decode_failed_total",
        "Malformed queue messages acknowledged without persisting"
    );
    metrics::describe_counter!(
        "orders_redelivered_total",
        "Deliveries left unacknowledged for redelivery"
    );

    metrics::describe_counter!("order_cache_hits_total", "Order cache hits");
    metrics::describe_counter!("order_cache_misses_total", "Order cache misses");
    metrics::describe_counter!("order_cache_evictions_total", "Order cache LRU evictions");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 单条队列消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested,
    Duplicate,
    DecodeFailed,
    Rejected,
    Redelivered,
}

/// 记录一条消息的入库结果
#[inline]
pub fn record_ingestion(outcome: IngestOutcome) {
    let name = match outcome {
        IngestOutcome::Ingested => "orders_ingested_total",
        IngestOutcome::Duplicate => "orders_duplicate_total",
        IngestOutcome::DecodeFailed => "orders_decode_failed_total",
        IngestOutcome::Rejected => "orders_rejected_total",
        IngestOutcome::Redelivered => "orders_redelivered_total",
    };
    metrics::counter!(name).increment(1);
}

/// 记录缓存查找结果
#[inline]
pub fn record_cache_lookup(hit: bool) {
    if hit {
        metrics::counter!("order_cache_hits_total").increment(1);
    } else {
        metrics::counter!("order_cache_misses_total").increment(1);
    }
}

/// 记录一次 LRU 淘汰
#[inline]
pub fn record_cache_eviction() {
    metrics::counter!("order_cache_evictions_total").increment(1);
}
