//! 启动阶段的重试
//!
//! 数据库等依赖在容器编排下常常比服务晚几秒就绪。这里按固定间隔重试若干次，
//! 配置错误之类的永久性故障由调用方传入的 `is_retryable` 判定后立即返回。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::SharedError;

/// 固定间隔重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次），至少为 1
    pub attempts: u32,
    /// 两次尝试之间的等待时间
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl From<&DatabaseConfig> for RetryPolicy {
    fn from(config: &DatabaseConfig) -> Self {
        Self::fixed(
            config.connect_attempts,
            Duration::from_millis(config.connect_retry_delay_ms),
        )
    }
}

/// 按策略执行异步操作
///
/// 返回最后一次尝试的错误。
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&SharedError) -> bool,
    mut operation: F,
) -> Result<T, SharedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SharedError>>,
{
    let mut attempt: u32 = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            warn!(operation = operation_name, code = err.code(), error = %err, "不可重试的错误");
            return Err(err);
        }

        if attempt >= policy.attempts {
            warn!(
                operation = operation_name,
                attempts = policy.attempts,
                code = err.code(),
                error = %err,
                "重试次数已用尽"
            );
            return Err(err);
        }

        warn!(
            operation = operation_name,
            attempt,
            attempts = policy.attempts,
            retry_in_ms = policy.delay.as_millis() as u64,
            error = %err,
            "操作失败，稍后重试"
        );
        tokio::time::sleep(policy.delay).await;
        attempt += 1;
    }
}
