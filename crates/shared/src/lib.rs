//! 共享库
//!
//! 订单服务与发布工具共用的基础设施代码：配置加载、错误类型、数据库连接池、
//! Kafka 生产者/消费者封装、重试策略以及可观测性初始化。

pub mod config;
pub mod database;
pub mod error;
pub mod kafka;
pub mod observability;
pub mod retry;
