//! 统一可观测性模块
//!
//! 提供日志与 Prometheus 指标的统一初始化。
//! 服务通过单一入口点配置可观测性，确保一致的日志格式和指标命名。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 可观测性资源守卫
///
/// 持有指标服务器的生命周期，Drop 时记录关闭日志。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. 日志（格式和级别由运行环境决定，可被配置覆盖）
/// 2. Prometheus 指标（`metrics_enabled = false` 时跳过）
pub async fn init(
    config: &ObservabilityConfig,
    environment: &str,
    service_name: &str,
) -> Result<ObservabilityGuard> {
    let settings = tracing::LogSettings::resolve(config, environment);
    tracing::init(&settings)?;

    info!(
        service = %service_name,
        environment = %environment,
        log_level = %settings.level,
        json_logs = settings.json,
        metrics_enabled = config.metrics_enabled,
        "Observability initialized"
    );

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(config.metrics_port, service_name).await?)
    } else {
        None
    };

    Ok(ObservabilityGuard {
        _metrics_handle: metrics_handle,
    })
}
