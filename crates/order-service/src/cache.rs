//! 内存订单缓存
//!
//! 容量固定的 LRU 缓存，键为订单号。消费者、启动预热和查询回填共享同一个实例，
//! 由调用方显式构造并以 `Arc` 传递，不存在全局单例。
//!
//! ## 并发模型
//!
//! 整张表由一把 `parking_lot::RwLock` 保护：
//! - `get` 只持读锁，多个读互不阻塞；命中时通过原子时钟刷新条目的最近使用时间
//! - `put` / `invalidate` 持写锁，对 `get` 原子可见，读到的要么是旧值要么是新值
//!
//! 淘汰时线性扫描找出时间戳最小的条目，代价与容量成正比。
//!
//! 锁内只做内存操作，任何存储访问都在锁外完成。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use order_shared::observability::metrics;
use parking_lot::RwLock;
use tracing::debug;

use crate::models::Order;

struct CacheSlot {
    order: Arc<Order>,
    last_used: AtomicU64,
}

/// 有界 LRU 订单缓存
pub struct OrderCache {
    capacity: usize,
    clock: AtomicU64,
    entries: RwLock<HashMap<String, CacheSlot>>,
}

impl OrderCache {
    /// 创建缓存，容量至少为 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            clock: AtomicU64::new(0),
            entries: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 查找订单，命中时刷新其最近使用时间
    pub fn get(&self, order_uid: &str) -> Option<Arc<Order>> {
        let found = {
            let entries = self.entries.read();
            entries.get(order_uid).map(|slot| {
                slot.last_used.store(self.tick(), Ordering::Relaxed);
                Arc::clone(&slot.order)
            })
        };

        metrics::record_cache_lookup(found.is_some());
        found
    }

    /// 写入或刷新订单
    ///
    /// 订单号是新的且缓存已满时，先淘汰最久未使用的一条。返回被淘汰的订单号。
    pub fn put(&self, order_uid: &str, order: impl Into<Arc<Order>>) -> Option<String> {
        let order = order.into();
        let mut entries = self.entries.write();
        let now = self.tick();

        if let Some(slot) = entries.get_mut(order_uid) {
            slot.order = order;
            *slot.last_used.get_mut() = now;
            return None;
        }

        let evicted = if entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            if let Some(key) = &victim {
                entries.remove(key);
                metrics::record_cache_eviction();
                debug!(evicted = %key, inserted = %order_uid, "订单缓存已满，淘汰最久未使用条目");
            }
            victim
        } else {
            None
        };

        entries.insert(
            order_uid.to_string(),
            CacheSlot {
                order,
                last_used: AtomicU64::new(now),
            },
        );
        evicted
    }

    /// 批量预热
    ///
    /// 按传入顺序依次写入，调用方应把最新的订单放在最后，使其最晚被淘汰。
    /// 返回后所有写入对其他线程可见。
    pub fn warm(&self, orders: impl IntoIterator<Item = Order>) -> usize {
        let mut loaded = 0;
        for order in orders {
            let order_uid = order.order_uid.clone();
            self.put(&order_uid, order);
            loaded += 1;
        }
        loaded
    }

    /// 显式移除一条订单，返回是否存在
    pub fn invalidate(&self, order_uid: &str) -> bool {
        self.entries.write().remove(order_uid).is_some()
    }

    /// 是否包含某订单，不影响最近使用顺序
    pub fn contains(&self, order_uid: &str) -> bool {
        self.entries.read().contains_key(order_uid)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for OrderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
