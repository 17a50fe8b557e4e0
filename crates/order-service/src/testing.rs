//! 测试辅助
//!
//! 内存版订单存储和订阅，以及固定样例订单。供单元测试和 `tests/` 下的集成测试使用，
//! 不依赖 PostgreSQL 或 Kafka。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use order_shared::kafka::ConsumerMessage;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::consumer::Subscription;
use crate::error::{OrderError, Result};
use crate::models::{Delivery, Item, Order, Payment};
use crate::store::OrderStore;

/// 样例订单创建时间：2021-11-26T06:22:19Z
const SAMPLE_CREATED_AT: i64 = 1_637_907_739;

/// 构造一个字段齐全、可通过校验的订单
pub fn sample_order(order_uid: &str) -> Order {
    let created = DateTime::from_timestamp(SAMPLE_CREATED_AT, 0).unwrap_or_default();
    sample_order_at(order_uid, created)
}

/// 构造指定创建时间的样例订单
pub fn sample_order_at(order_uid: &str, date_created: DateTime<Utc>) -> Order {
    Order {
        order_uid: order_uid.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: order_uid.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1_637_907_727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        },
        items: vec![Item {
            chrt_id: 9_934_930,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453,
            rid: "ab4219087a764ae0btest".to_string(),
            name: "Mascaras".to_string(),
            sale: 30,
            size: "0".to_string(),
            total_price: 317,
            nm_id: 2_389_212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }],
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        date_created,
        oof_shard: "1".to_string(),
    }
}

// ---------------------------------------------------------------------------
// MemoryOrderStore
// ---------------------------------------------------------------------------

/// 内存订单存储
///
/// 以订单号为键，语义与 PostgreSQL 实现一致（重复写入返回 `DuplicateKey`）。
/// 支持注入暂时性故障和写入延迟，并记录调用统计。
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: DashMap<String, Order>,
    failing_saves: AtomicUsize,
    failing_loads: AtomicBool,
    save_delay: Mutex<Duration>,
    save_attempts: AtomicUsize,
    get_calls: AtomicUsize,
    saves_in_flight: AtomicUsize,
    max_saves_in_flight: AtomicUsize,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置订单，不计入写入统计
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let store = Self::new();
        for order in orders {
            store.orders.insert(order.order_uid.clone(), order);
        }
        store
    }

    /// 接下来的 `count` 次写入返回暂时性错误
    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// `load_recent` 是否返回暂时性错误
    pub fn fail_loads(&self, fail: bool) {
        self.failing_loads.store(fail, Ordering::SeqCst);
    }

    /// 每次写入前等待的时间
    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock() = delay;
    }

    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// 观察到的最大并发写入数
    pub fn max_saves_in_flight(&self) -> usize {
        self.max_saves_in_flight.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn contains(&self, order_uid: &str) -> bool {
        self.orders.contains_key(order_uid)
    }

    fn take_scripted_failure(&self) -> bool {
        self.failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn save(&self, order: &Order) -> Result<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let current = self.saves_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_saves_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.save_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = if self.take_scripted_failure() {
            Err(OrderError::TransientStore("scripted failure".to_string()))
        } else {
            match self.orders.entry(order.order_uid.clone()) {
                Entry::Occupied(_) => Err(OrderError::DuplicateKey {
                    order_uid: order.order_uid.clone(),
                }),
                Entry::Vacant(slot) => {
                    slot.insert(order.clone());
                    Ok(())
                }
            }
        };

        self.saves_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get(&self, order_uid: &str) -> Result<Option<Order>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.orders.get(order_uid).map(|entry| entry.value().clone()))
    }

    async fn load_recent(&self, limit: usize) -> Result<Vec<Order>> {
        if self.failing_loads.load(Ordering::SeqCst) {
            return Err(OrderError::TransientStore("scripted failure".to_string()));
        }

        let mut orders: Vec<Order> = self.orders.iter().map(|e| e.value().clone()).collect();
        orders.sort_by(|a, b| {
            a.date_created
                .cmp(&b.date_created)
                .then_with(|| a.order_uid.cmp(&b.order_uid))
        });
        let skip = orders.len().saturating_sub(limit);
        Ok(orders.split_off(skip))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySubscription
// ---------------------------------------------------------------------------

/// 基于 channel 的内存订阅
///
/// `publish` 追加一条消息并分配递增的位点；确认记录按确认顺序保存。
pub struct MemorySubscription {
    topic: String,
    sender: Mutex<Option<mpsc::UnboundedSender<ConsumerMessage>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConsumerMessage>>,
    next_offset: AtomicI64,
    acked: Mutex<Vec<i64>>,
    ack_notify: Notify,
    subscribed: AtomicBool,
    unsubscribed: AtomicBool,
}

impl MemorySubscription {
    pub fn new(topic: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            topic: topic.to_string(),
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            next_offset: AtomicI64::new(0),
            acked: Mutex::new(Vec::new()),
            ack_notify: Notify::new(),
            subscribed: AtomicBool::new(false),
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// 发布一条消息，返回其位点
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> i64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let msg = ConsumerMessage {
            topic: self.topic.clone(),
            partition: 0,
            offset,
            key: None,
            payload: payload.into(),
            timestamp: None,
            headers: HashMap::new(),
        };
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(msg);
        }
        offset
    }

    /// 发布订单的 JSON 序列化结果
    pub fn publish_order(&self, order: &Order) -> i64 {
        let payload = serde_json::to_vec(order).unwrap_or_default();
        self.publish(payload)
    }

    /// 结束消息流，已发布的消息仍会被拉取
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// 已确认的位点（按确认顺序）
    pub fn acked_offsets(&self) -> Vec<i64> {
        self.acked.lock().clone()
    }

    pub fn is_acked(&self, offset: i64) -> bool {
        self.acked.lock().contains(&offset)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    /// 等待至少 `count` 条消息被确认，超时返回 false
    pub async fn wait_for_acks(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.ack_notify.notified();
                if self.acked.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn subscribe(&self) -> Result<()> {
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn next(&self) -> Option<Result<ConsumerMessage>> {
        self.receiver.lock().await.recv().await.map(Ok)
    }

    fn ack(&self, msg: &ConsumerMessage) -> Result<()> {
        self.acked.lock().push(msg.offset);
        self.ack_notify.notify_waiters();
        Ok(())
    }

    fn unsubscribe(&self) -> Result<()> {
        self.unsubscribed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
