//! 订单存储层
//!
//! 存储是订单的唯一可信来源，缓存只是它的派生副本。
//! 定义 trait 接口以便消费者和查询服务依赖抽象，测试中替换为内存实现或 mock。

mod postgres;

pub use postgres::PgOrderStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Order;

/// 订单存储接口
///
/// 实现必须可被多个任务并发调用。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 持久化订单
    ///
    /// 订单号已存在时返回 `OrderError::DuplicateKey`；数据本身无法落库时返回
    /// `OrderError::Rejected`；存储不可用时返回 `OrderError::TransientStore`。
    async fn save(&self, order: &Order) -> Result<()>;

    /// 按订单号查询
    async fn get(&self, order_uid: &str) -> Result<Option<Order>>;

    /// 加载最近的 `limit` 条订单，按创建时间升序（最新的在最后）
    async fn load_recent(&self, limit: usize) -> Result<Vec<Order>>;

    /// 存储连通性检查
    async fn ping(&self) -> Result<()>;
}
