//! 启动预热
//!
//! 在消费者和 HTTP 服务启动前，从存储加载最近的订单写入缓存。
//! 加载失败不影响启动，缓存从空开始，最初几次查询多一次存储往返。

use tracing::{info, warn};

use crate::cache::OrderCache;
use crate::store::OrderStore;

/// 预热缓存，返回载入的订单数
pub async fn warm_up(store: &dyn OrderStore, cache: &OrderCache, limit: usize) -> usize {
    if limit == 0 {
        info!("预热数量为 0，跳过缓存预热");
        return 0;
    }

    match store.load_recent(limit).await {
        Ok(orders) => {
            let loaded = cache.warm(orders);
            info!(loaded, capacity = cache.capacity(), "订单缓存预热完成");
            loaded
        }
        Err(e) => {
            warn!(error = %e, "订单缓存预热失败，以空缓存启动");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrderError;
    use crate::store::MockOrderStore;
    use crate::testing::sample_order;

    #[tokio::test]
    async fn test_warm_up_loads_recent_orders() {
        let mut store = MockOrderStore::new();
        store
            .expect_load_recent()
            .withf(|limit| *limit == 2)
            .times(1)
            .returning(|_| Ok(vec![sample_order("older"), sample_order("newest")]));
        let cache = OrderCache::new(2);

        assert_eq!(warm_up(&store, &cache, 2).await, 2);
        assert!(cache.contains("older"));
        assert!(cache.contains("newest"));
    }

    #[tokio::test]
    async fn test_warm_up_failure_is_non_fatal() {
        let mut store = MockOrderStore::new();
        store
            .expect_load_recent()
            .returning(|_| Err(OrderError::TransientStore("connection refused".into())));
        let cache = OrderCache::new(2);

        assert_eq!(warm_up(&store, &cache, 2).await, 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_skips_store() {
        let mut store = MockOrderStore::new();
        store.expect_load_recent().never();

        assert_eq!(warm_up(&store, &OrderCache::new(2), 0).await, 0);
    }
}
