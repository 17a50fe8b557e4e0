//! 订单查询服务
//!
//! 先查缓存，未命中再查存储并回填缓存。缓存命中路径不访问存储。

use std::sync::Arc;

use tracing::{debug, error, instrument};

use crate::cache::OrderCache;
use crate::error::{OrderError, Result};
use crate::models::Order;
use crate::store::OrderStore;

#[derive(Clone)]
pub struct OrderLookupService {
    store: Arc<dyn OrderStore>,
    cache: Arc<OrderCache>,
}

impl OrderLookupService {
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<OrderCache>) -> Self {
        Self { store, cache }
    }

    /// 按订单号查询
    ///
    /// 返回 `NotFound` 或 `Internal`，存储层的具体错误只记录日志。
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, order_uid: &str) -> Result<Arc<Order>> {
        if let Some(order) = self.cache.get(order_uid) {
            debug!("缓存命中");
            return Ok(order);
        }

        match self.store.get(order_uid).await {
            Ok(Some(order)) => {
                let order = Arc::new(order);
                // 与消费者并发写入同一订单时后写者胜出，两者来自同一份落库数据
                self.cache.put(order_uid, Arc::clone(&order));
                debug!("缓存未命中，已从存储回填");
                Ok(order)
            }
            Ok(None) => Err(OrderError::NotFound {
                order_uid: order_uid.to_string(),
            }),
            Err(e) => {
                error!(error = %e, "查询订单失败");
                Err(OrderError::Internal(e.to_string()))
            }
        }
    }
}
