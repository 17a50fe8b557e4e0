//! 队列订阅抽象
//!
//! 消费循环只依赖这组最小原语：订阅、拉取、确认、取消订阅。
//! 生产环境由 Kafka 实现，测试中使用内存实现。

use async_trait::async_trait;
use order_shared::config::{KafkaConfig, QueueConfig};
use order_shared::kafka::{ConsumerMessage, KafkaConsumer};

use crate::error::{OrderError, Result};

/// 手动确认模式的持久订阅
#[async_trait]
pub trait Subscription: Send + Sync + 'static {
    fn subscribe(&self) -> Result<()>;

    /// 拉取下一条消息，`None` 表示消息流已结束
    async fn next(&self) -> Option<Result<ConsumerMessage>>;

    /// 确认一条消息，确认后不会再被投递
    fn ack(&self, msg: &ConsumerMessage) -> Result<()>;

    /// 取消订阅，未确认的消息保留给下一次订阅
    fn unsubscribe(&self) -> Result<()>;
}

/// Kafka 持久订阅
///
/// 消费组 id 为 `{consumer_group}.{durable_name}`，提交的位点跨重启保留。
pub struct KafkaSubscription {
    consumer: KafkaConsumer,
    topic: String,
}

impl KafkaSubscription {
    pub fn new(kafka: &KafkaConfig, queue: &QueueConfig) -> Result<Self> {
        let consumer = KafkaConsumer::new(kafka, Some(queue.durable_name.as_str()))?;
        Ok(Self {
            consumer,
            topic: queue.topic.clone(),
        })
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    fn subscribe(&self) -> Result<()> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        Ok(())
    }

    async fn next(&self) -> Option<Result<ConsumerMessage>> {
        Some(self.consumer.recv().await.map_err(OrderError::from))
    }

    fn ack(&self, msg: &ConsumerMessage) -> Result<()> {
        self.consumer.commit(msg)?;
        Ok(())
    }

    fn unsubscribe(&self) -> Result<()> {
        self.consumer.unsubscribe();
        Ok(())
    }
}
