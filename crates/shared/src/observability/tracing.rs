//! 日志初始化模块
//!
//! 基于 tracing-subscriber 构建日志层。输出格式随运行环境变化：
//!
//! | 环境  | 格式   | 默认级别 |
//! |-------|--------|----------|
//! | local | pretty | debug    |
//! | dev   | json   | debug    |
//! | prod  | json   | info     |
//!
//! `RUST_LOG` 环境变量始终优先于配置。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// 解析后的日志设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl LogSettings {
    /// 运行环境对应的默认日志设置，未知环境按生产环境处理
    pub fn for_environment(environment: &str) -> Self {
        match environment {
            "local" => Self {
                level: "debug".to_string(),
                json: false,
            },
            "dev" => Self {
                level: "debug".to_string(),
                json: true,
            },
            _ => Self {
                level: "info".to_string(),
                json: true,
            },
        }
    }

    /// 以运行环境为基础，叠加配置中显式指定的级别和格式
    pub fn resolve(config: &ObservabilityConfig, environment: &str) -> Self {
        let mut settings = Self::for_environment(environment);
        if let Some(level) = &config.log_level {
            settings.level = level.clone();
        }
        if let Some(format) = &config.log_format {
            settings.json = format.eq_ignore_ascii_case("json");
        }
        settings
    }
}

/// 初始化全局 tracing subscriber
pub fn init(settings: &LogSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if settings.json {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
