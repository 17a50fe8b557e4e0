//! 消费链路集成测试
//!
//! 使用内存存储和内存订阅驱动完整的 IngestionConsumer，
//! 覆盖幂等、重投、毒消息、并发上限和关闭流程。

use std::sync::Arc;
use std::time::Duration;

use order_service::cache::OrderCache;
use order_service::consumer::{
    ConsumerSettings, IngestionConsumer, OrderIngestor, SubscriptionState,
};
use order_service::testing::{MemoryOrderStore, MemorySubscription, sample_order};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Pipeline {
    store: Arc<MemoryOrderStore>,
    cache: Arc<OrderCache>,
    consumer: Arc<IngestionConsumer<MemorySubscription>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<order_service::Result<()>>,
}

impl Pipeline {
    fn start(store: MemoryOrderStore, settings: ConsumerSettings) -> Self {
        let store = Arc::new(store);
        let cache = Arc::new(OrderCache::new(10));
        let ingestor = OrderIngestor::new(store.clone(), Arc::clone(&cache));
        let consumer = Arc::new(IngestionConsumer::new(
            MemorySubscription::new("orders"),
            ingestor,
            settings,
        ));

        let (shutdown, rx) = watch::channel(false);
        let runner = Arc::clone(&consumer);
        let task = tokio::spawn(async move { runner.run(rx).await });

        Self {
            store,
            cache,
            consumer,
            shutdown,
            task,
        }
    }

    fn subscription(&self) -> &MemorySubscription {
        self.consumer.subscription()
    }

    async fn stop(self) -> Arc<IngestionConsumer<MemorySubscription>> {
        self.shutdown.send_replace(true);
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("consumer did not stop")
            .unwrap()
            .unwrap();
        self.consumer
    }
}

fn settings(max_inflight: usize, redelivery_wait: Duration) -> ConsumerSettings {
    ConsumerSettings {
        max_inflight,
        redelivery_wait,
        shutdown_grace: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let pipeline = Pipeline::start(
        MemoryOrderStore::new(),
        settings(1, Duration::from_millis(50)),
    );
    let order = sample_order("b563feb7b2b84b6test");

    pipeline.subscription().publish_order(&order);
    assert!(pipeline.subscription().wait_for_acks(1, WAIT).await);
    assert!(pipeline.cache.contains(&order.order_uid));

    pipeline.subscription().publish_order(&order);
    assert!(pipeline.subscription().wait_for_acks(2, WAIT).await);

    assert_eq!(pipeline.store.len(), 1);
    assert_eq!(pipeline.store.save_attempts(), 2);
    assert_eq!(
        pipeline.cache.get(&order.order_uid).as_deref(),
        Some(&order)
    );
    assert_eq!(pipeline.subscription().acked_offsets(), vec![0, 1]);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_transient_failure_acks_only_after_redelivery() {
    let store = MemoryOrderStore::new();
    store.fail_next_saves(1);
    let pipeline = Pipeline::start(store, settings(5, Duration::from_millis(300)));

    let offset = pipeline.subscription().publish_order(&sample_order("uid-retry"));

    // 第一次写入失败后处于重投等待中
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.store.save_attempts(), 1);
    assert!(!pipeline.subscription().is_acked(offset));
    assert!(!pipeline.cache.contains("uid-retry"));

    assert!(pipeline.subscription().wait_for_acks(1, WAIT).await);
    assert_eq!(pipeline.store.save_attempts(), 2);
    assert_eq!(pipeline.subscription().acked_offsets(), vec![offset]);
    assert_eq!(pipeline.store.len(), 1);
    assert_eq!(pipeline.cache.len(), 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_poison_message_does_not_block_valid_ones() {
    let pipeline = Pipeline::start(
        MemoryOrderStore::new(),
        settings(1, Duration::from_millis(50)),
    );

    let poison = pipeline.subscription().publish(b"{\"order_uid\": 42".to_vec());
    let valid = pipeline
        .subscription()
        .publish_order(&sample_order("uid-after-poison"));

    assert!(pipeline.subscription().wait_for_acks(2, WAIT).await);
    assert!(pipeline.subscription().is_acked(poison));
    assert!(pipeline.subscription().is_acked(valid));

    assert_eq!(pipeline.store.save_attempts(), 1);
    assert_eq!(pipeline.store.len(), 1);
    assert_eq!(pipeline.cache.len(), 1);
    assert!(pipeline.cache.contains("uid-after-poison"));

    pipeline.stop().await;
}

#[tokio::test]
async fn test_in_flight_handlers_bounded_by_max_inflight() {
    let store = MemoryOrderStore::new();
    store.set_save_delay(Duration::from_millis(30));
    let pipeline = Pipeline::start(store, settings(3, Duration::from_millis(50)));

    for i in 0..12 {
        pipeline
            .subscription()
            .publish_order(&sample_order(&format!("uid-{i}")));
    }

    assert!(pipeline.subscription().wait_for_acks(12, WAIT).await);
    assert_eq!(pipeline.store.len(), 12);
    assert!(pipeline.store.max_saves_in_flight() <= 3);
    // 缓存容量 10，12 个订单入库后只保留 10 个
    assert_eq!(pipeline.cache.len(), 10);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_message_awaiting_redelivery_holds_inflight_slot() {
    let store = MemoryOrderStore::new();
    store.fail_next_saves(1);
    let pipeline = Pipeline::start(store, settings(1, Duration::from_millis(500)));

    let first = pipeline.subscription().publish_order(&sample_order("uid-first"));
    let second = pipeline.subscription().publish_order(&sample_order("uid-second"));

    // 第一条在重投等待中，唯一的在途额度被占用，第二条不会被拉取
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pipeline.store.save_attempts(), 1);
    assert!(pipeline.subscription().acked_offsets().is_empty());
    assert!(!pipeline.store.contains("uid-second"));

    assert!(pipeline.subscription().wait_for_acks(2, WAIT).await);
    assert_eq!(pipeline.subscription().acked_offsets(), vec![first, second]);
    assert_eq!(pipeline.store.save_attempts(), 3);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_unstorable_order_does_not_stall_ingestion() {
    let pipeline = Pipeline::start(
        MemoryOrderStore::new(),
        settings(1, Duration::from_secs(60)),
    );

    let mut with_nul = sample_order("uid-nul");
    with_nul.delivery.address = "Ploshad\0Mira".to_string();

    let too_long = pipeline
        .subscription()
        .publish_order(&sample_order(&"u".repeat(80)));
    let nul = pipeline.subscription().publish_order(&with_nul);
    let valid = pipeline.subscription().publish_order(&sample_order("uid-valid"));

    assert!(pipeline.subscription().wait_for_acks(3, WAIT).await);
    assert_eq!(pipeline.subscription().acked_offsets(), vec![too_long, nul, valid]);
    assert_eq!(pipeline.store.save_attempts(), 1);
    assert_eq!(pipeline.store.len(), 1);
    assert_eq!(pipeline.cache.len(), 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_shutdown_abandons_pending_redelivery_without_ack() {
    let store = MemoryOrderStore::new();
    store.fail_next_saves(usize::MAX);
    let pipeline = Pipeline::start(store, settings(5, Duration::from_secs(60)));

    pipeline.subscription().publish_order(&sample_order("uid-stuck"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.store.save_attempts(), 1);

    let consumer = pipeline.stop().await;

    assert_eq!(consumer.state(), SubscriptionState::Closed);
    assert!(consumer.subscription().acked_offsets().is_empty());
    assert!(consumer.subscription().is_unsubscribed());
}

#[tokio::test]
async fn test_shutdown_grace_abandons_slow_handlers() {
    let store = MemoryOrderStore::new();
    store.set_save_delay(Duration::from_secs(30));
    let pipeline = Pipeline::start(
        store,
        ConsumerSettings {
            max_inflight: 2,
            redelivery_wait: Duration::from_millis(50),
            shutdown_grace: Duration::from_millis(100),
        },
    );

    pipeline.subscription().publish_order(&sample_order("uid-slow"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let consumer = pipeline.stop().await;

    assert_eq!(consumer.state(), SubscriptionState::Closed);
    assert!(consumer.subscription().acked_offsets().is_empty());
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_save() {
    let store = MemoryOrderStore::new();
    store.set_save_delay(Duration::from_millis(200));
    let pipeline = Pipeline::start(store, settings(2, Duration::from_millis(50)));

    let offset = pipeline.subscription().publish_order(&sample_order("uid-finishing"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let store = Arc::clone(&pipeline.store);
    let consumer = pipeline.stop().await;

    // 宽限期（2s）内写入完成，消息被确认
    assert!(consumer.subscription().is_acked(offset));
    assert!(store.contains("uid-finishing"));
}

#[tokio::test]
async fn test_state_transitions() {
    let pipeline = Pipeline::start(
        MemoryOrderStore::new(),
        settings(1, Duration::from_millis(50)),
    );

    let mut states = pipeline.consumer.watch_state();
    tokio::time::timeout(
        WAIT,
        states.wait_for(|s| *s == SubscriptionState::Consuming),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(pipeline.subscription().is_subscribed());

    let consumer = pipeline.stop().await;
    assert_eq!(consumer.state(), SubscriptionState::Closed);
}

#[tokio::test]
async fn test_closed_stream_ends_consumer() {
    let pipeline = Pipeline::start(
        MemoryOrderStore::new(),
        settings(1, Duration::from_millis(50)),
    );
    pipeline.subscription().publish_order(&sample_order("uid-last"));
    pipeline.subscription().close();

    let result = tokio::time::timeout(WAIT, pipeline.task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(pipeline.consumer.state(), SubscriptionState::Closed);
    assert_eq!(pipeline.consumer.subscription().acked_offsets(), vec![0]);
}
