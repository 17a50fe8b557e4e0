//! 单条订单消息的处理
//!
//! 解码 -> 落库 -> 写缓存 -> 返回确认决定。处理函数本身不接触队列，
//! 由消费循环根据返回的 `AckDecision` 决定确认还是等待重投。

use std::sync::Arc;

use order_shared::observability::metrics::{self, IngestOutcome};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::cache::OrderCache;
use crate::error::{OrderError, Result};
use crate::models::Order;
use crate::store::OrderStore;

/// 消息处理结果对应的确认决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// 已处理完毕（包括重复订单和无法解码的消息），确认消息
    Ack,
    /// 存储暂时不可用，不确认，等待重投
    Redeliver,
}

/// 将消息负载解码为经过校验的订单
pub fn decode_order(payload: &[u8]) -> Result<Order> {
    let order: Order = serde_json::from_slice(payload)?;
    order.validate()?;
    Ok(order)
}

/// 订单入库处理器
///
/// 持有存储和缓存的共享引用，可在多个处理任务间克隆。
#[derive(Clone)]
pub struct OrderIngestor {
    store: Arc<dyn OrderStore>,
    cache: Arc<OrderCache>,
}

impl OrderIngestor {
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<OrderCache>) -> Self {
        Self { store, cache }
    }

    /// 处理一条消息负载
    ///
    /// 先落库后写缓存，落库成功或确认重复时写缓存并返回 `Ack`。
    /// 畸形消息和被存储永久拒绝的订单不会在重投后变得可写，直接确认丢弃，
    /// 不写缓存。
    pub async fn handle(&self, payload: &[u8]) -> AckDecision {
        let order = match decode_order(payload) {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, payload_len = payload.len(), "订单消息无法解码，确认并丢弃");
                metrics::record_ingestion(IngestOutcome::DecodeFailed);
                return AckDecision::Ack;
            }
        };

        match self.store.save(&order).await {
            Ok(()) => {
                info!(order_uid = %order.order_uid, "订单已入库");
                metrics::record_ingestion(IngestOutcome::Ingested);
            }
            Err(OrderError::DuplicateKey { .. }) => {
                debug!(order_uid = %order.order_uid, "订单已存在，按重投处理");
                metrics::record_ingestion(IngestOutcome::Duplicate);
            }
            Err(e @ OrderError::Rejected { .. }) => {
                // 与解码失败同理，重投不会让存储接受这条数据
                warn!(order_uid = %order.order_uid, error = %e, "存储拒绝写入订单，确认并丢弃");
                metrics::record_ingestion(IngestOutcome::Rejected);
                return AckDecision::Ack;
            }
            Err(e) => {
                // 非重复的存储错误一律等待重投，保证至少一次
                warn!(
                    order_uid = %order.order_uid,
                    error = %e,
                    transient = e.is_transient(),
                    "订单入库失败，消息保持未确认"
                );
                metrics::record_ingestion(IngestOutcome::Redelivered);
                return AckDecision::Redeliver;
            }
        }

        let order_uid = order.order_uid.clone();
        if let Some(evicted) = self.cache.put(&order_uid, order) {
            debug!(order_uid = %order_uid, evicted = %evicted, "写入缓存时淘汰旧订单");
        }

        AckDecision::Ack
    }
}
