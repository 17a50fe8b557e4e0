//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射和手动提交语义。
//!
//! 消费端关闭了自动提交：每条消息由业务显式确认后才推进分区位点。
//! 确认可以乱序发生，`OffsetTracker` 保证只提交连续已确认的前缀，
//! 未确认的消息在重启或再均衡后一定会被重新投递。

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::SharedError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

pub mod topics {
    /// 订单事件的默认 topic，部署时可通过 queue.topic 覆盖
    pub const ORDERS: &str = "orders";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }
}

// ---------------------------------------------------------------------------
// OffsetTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PartitionOffsets {
    /// 已投递但尚未确认的位点
    outstanding: BTreeSet<i64>,
    highest_seen: Option<i64>,
    /// 最近一次提交的位点（下一条待消费消息的位点）
    committed: Option<i64>,
}

/// 分区位点跟踪器
///
/// Kafka 的提交是按分区累计的：提交位点 N 意味着 N 之前的消息全部处理完毕。
/// 消息并行处理、乱序确认时，可提交位点 = 最小的未确认位点；
/// 没有未确认消息时为已见最大位点 + 1。
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条已投递、等待确认的消息
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        let entry = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        entry.outstanding.insert(offset);
        entry.highest_seen = Some(entry.highest_seen.map_or(offset, |h| h.max(offset)));
    }

    /// 确认一条消息，返回需要提交的新位点
    ///
    /// 返回 `None` 表示提交位点没有前进（前面还有未确认的消息，或该位点未被跟踪）。
    pub fn complete(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let entry = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !entry.outstanding.remove(&offset) {
            return None;
        }

        let next = match entry.outstanding.first() {
            Some(&lowest) => lowest,
            None => entry.highest_seen? + 1,
        };

        if entry.committed.is_some_and(|committed| next <= committed) {
            return None;
        }
        entry.committed = Some(next);
        Some(next)
    }

    /// 某分区当前未确认的消息数
    pub fn outstanding(&self, topic: &str, partition: i32) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |p| p.outstanding.len())
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法，
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    pub fn new(config: &KafkaConfig) -> Result<Self, SharedError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| SharedError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), SharedError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| SharedError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), SharedError> {
        let payload = serde_json::to_vec(value)?;
        self.send(topic, key, &payload).await
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 手动确认模式的 Kafka 消费者
///
/// `recv` 拉取一条消息并登记到位点跟踪器，`commit` 在业务确认后推进提交位点。
/// 两者都只需要 `&self`，可以被多个处理任务共享。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    offsets: Mutex<OffsetTracker>,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 通常是 durable 订阅名，拼接在订阅组名之后作为 group.id，
    /// 例如 "orders_group.simple-cluster-dur"。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, SharedError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()
            .map_err(|e| SharedError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer,
            offsets: Mutex::new(OffsetTracker::new()),
        })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), SharedError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| SharedError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 拉取下一条消息
    pub async fn recv(&self) -> Result<ConsumerMessage, SharedError> {
        let borrowed = self
            .consumer
            .recv()
            .await
            .map_err(|e| SharedError::Kafka(format!("接收消息失败: {e}")))?;

        let msg = ConsumerMessage::from_borrowed(&borrowed);
        self.offsets.lock().track(&msg.topic, msg.partition, msg.offset);

        debug!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            "收到 Kafka 消息"
        );
        Ok(msg)
    }

    /// 确认一条消息，必要时异步提交分区位点
    ///
    /// 提交失败时该消息已从跟踪器移除，不会重投；分区提交是累计的，
    /// 后续任一推进位点的确认会把它一并提交。
    pub fn commit(&self, msg: &ConsumerMessage) -> Result<(), SharedError> {
        let next = self
            .offsets
            .lock()
            .complete(&msg.topic, msg.partition, msg.offset);

        let Some(next) = next else {
            return Ok(());
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(next))
            .map_err(|e| SharedError::Kafka(format!("构造提交位点失败: {e}")))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| SharedError::Kafka(format!("提交位点失败: {e}")))?;

        debug!(topic = %msg.topic, partition = msg.partition, offset = next, "位点已提交");
        Ok(())
    }

    /// 取消订阅，未提交的位点保留给下一次订阅
    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        info!("已取消 Kafka 订阅");
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
