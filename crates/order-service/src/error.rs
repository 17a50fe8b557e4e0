//! 订单服务错误类型
//!
//! 在共享库 SharedError 基础上定义订单链路特有的错误：
//! 消息解码失败、存储暂时不可用、存储拒绝写入、重复订单、订单不存在。
//! 消费者根据变体决定确认还是等待重投，HTTP 层据此映射状态码。

use order_shared::error::SharedError;

/// 订单服务错误
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// 消息负载不是合法订单，重投也不会变好，确认后丢弃
    #[error("订单消息解码失败: {0}")]
    Decode(String),

    /// 存储不可用或超时，消息保持未确认等待重投
    #[error("存储暂时不可用: {0}")]
    TransientStore(String),

    /// 存储永久拒绝该订单（数据异常、约束冲突），重投也无法成功，确认后丢弃
    #[error("存储拒绝写入订单 {order_uid}: {reason}")]
    Rejected { order_uid: String, reason: String },

    /// 订单号已存在，重投场景下视为成功
    #[error("订单已存在: {order_uid}")]
    DuplicateKey { order_uid: String },

    #[error("订单不存在: {order_uid}")]
    NotFound { order_uid: String },

    #[error("内部错误: {0}")]
    Internal(String),

    #[error(transparent)]
    Shared(#[from] SharedError),
}

impl OrderError {
    /// 重投有可能成功的错误
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientStore(_) => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        Self::TransientStore(err.to_string())
    }
}

impl From<validator::ValidationErrors> for OrderError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Decode(errors.to_string())
    }
}

impl From<serde_json::Error> for OrderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrderError::DuplicateKey {
            order_uid: "b563feb7b2b84b6test".to_string(),
        };
        assert_eq!(err.to_string(), "订单已存在: b563feb7b2b84b6test");

        let err = OrderError::NotFound {
            order_uid: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "订单不存在: missing");

        let err = OrderError::Shared(SharedError::Kafka("broker 不可达".to_string()));
        assert_eq!(err.to_string(), "Kafka 错误: broker 不可达");
    }

    #[test]
    fn test_is_transient() {
        assert!(OrderError::TransientStore("timeout".into()).is_transient());
        assert!(OrderError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!OrderError::Decode("bad".into()).is_transient());
        assert!(
            !OrderError::Rejected {
                order_uid: "x".into(),
                reason: "value too long".into()
            }
            .is_transient()
        );
        assert!(
            !OrderError::DuplicateKey {
                order_uid: "x".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_json_error_is_decode() {
        let err: OrderError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, OrderError::Decode(_)));
    }
}
