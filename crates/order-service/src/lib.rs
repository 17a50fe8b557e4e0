//! 订单查询服务
//!
//! 从持久队列消费订单并落库，对外提供按订单号的 HTTP 查询，
//! 查询由有界内存缓存加速。
//!
//! ## 模块结构
//!
//! - `models`: 订单领域模型
//! - `cache`: 有界 LRU 订单缓存
//! - `store`: 订单存储接口与 PostgreSQL 实现
//! - `consumer`: 至少一次语义的队列消费者
//! - `lookup`: 缓存优先的查询服务
//! - `warmup`: 启动时的缓存预热
//! - `http`: 路由与错误响应
//! - `publisher`: 订单发布工具
//! - `testing`: 内存存储与订阅，供测试使用

pub mod cache;
pub mod consumer;
pub mod error;
pub mod http;
pub mod lookup;
pub mod models;
pub mod publisher;
pub mod state;
pub mod store;
pub mod testing;
pub mod warmup;

pub use error::{OrderError, Result};
pub use models::Order;
