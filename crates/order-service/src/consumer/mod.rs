//! 订单消息消费者
//!
//! 长期运行的持久订阅，在途未确认消息数不超过 `max_inflight`，每条消息显式确认。
//!
//! ## 生命周期
//!
//! `Created -> Subscribed -> Consuming -> Unsubscribing -> Closed`
//!
//! 收到关闭信号后停止拉取新消息，在宽限期内等待在途处理完成，超时的处理任务被放弃
//! （其消息保持未确认，重启后重投），最后取消订阅。
//!
//! ## 重投
//!
//! 处理结果为 `Redeliver` 的消息在 `redelivery_wait` 之后交给处理器重试。
//! 等待期间该消息仍占用一个在途额度，与队列侧的未确认语义一致。

mod handler;
mod subscription;

pub use handler::{AckDecision, OrderIngestor, decode_order};
pub use subscription::{KafkaSubscription, Subscription};

use std::sync::Arc;
use std::time::Duration;

use order_shared::config::QueueConfig;
use order_shared::kafka::ConsumerMessage;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::Result;

/// 拉取失败后的退避时间
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// 订阅状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Subscribed,
    Consuming,
    Unsubscribing,
    Closed,
}

/// 消费循环参数
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub max_inflight: usize,
    pub redelivery_wait: Duration,
    pub shutdown_grace: Duration,
}

impl From<&QueueConfig> for ConsumerSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_inflight: config.max_inflight,
            redelivery_wait: config.redelivery_wait(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// 订单消费者
///
/// 传输无关：驱动任意 `Subscription` 实现，并发处理数由信号量限制。
pub struct IngestionConsumer<S: Subscription> {
    subscription: Arc<S>,
    ingestor: OrderIngestor,
    settings: ConsumerSettings,
    state: watch::Sender<SubscriptionState>,
}

impl<S: Subscription> IngestionConsumer<S> {
    pub fn new(subscription: S, ingestor: OrderIngestor, settings: ConsumerSettings) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Created);
        Self {
            subscription: Arc::new(subscription),
            ingestor,
            settings,
            state,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    pub fn subscription(&self) -> &Arc<S> {
        &self.subscription
    }

    fn set_state(&self, state: SubscriptionState) {
        debug!(?state, "订阅状态变更");
        self.state.send_replace(state);
    }

    /// 运行消费循环直到收到关闭信号或消息流结束
    ///
    /// 关闭信号发送方被丢弃同样视为关闭。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.subscription.subscribe()?;
        self.set_state(SubscriptionState::Subscribed);

        let max_inflight = self.settings.max_inflight.max(1);
        info!(
            max_inflight,
            redelivery_wait_secs = self.settings.redelivery_wait.as_secs(),
            "订单消费者已启动"
        );
        self.set_state(SubscriptionState::Consuming);

        let permits = Arc::new(Semaphore::new(max_inflight));
        let mut workers = JoinSet::new();

        loop {
            while let Some(joined) = workers.try_join_next() {
                log_worker_exit(joined);
            }

            // 先拿到在途额度再拉取，保证未确认消息数不超过上限
            let permit = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                next = self.subscription.next() => next,
            };

            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    error!(error = %e, "拉取订单消息失败");
                    drop(permit);
                    tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|stop| *stop) => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => continue,
                    }
                }
                None => {
                    info!("订单消息流已结束");
                    break;
                }
            };

            workers.spawn(deliver(
                Arc::clone(&self.subscription),
                self.ingestor.clone(),
                msg,
                self.settings.redelivery_wait,
                shutdown.clone(),
                permit,
            ));
        }

        self.set_state(SubscriptionState::Unsubscribing);
        self.drain(&mut workers).await;

        if let Err(e) = self.subscription.unsubscribe() {
            warn!(error = %e, "取消订阅失败");
        }
        self.set_state(SubscriptionState::Closed);
        info!("订单消费者已停止");
        Ok(())
    }

    /// 在宽限期内等待在途处理完成，超时后放弃剩余任务
    async fn drain(&self, workers: &mut JoinSet<()>) {
        let in_flight = workers.len();
        if in_flight == 0 {
            return;
        }
        info!(in_flight, grace_secs = self.settings.shutdown_grace.as_secs(), "等待在途消息处理完成");

        let finished = tokio::time::timeout(self.settings.shutdown_grace, async {
            while let Some(joined) = workers.join_next().await {
                log_worker_exit(joined);
            }
        })
        .await;

        if finished.is_err() {
            warn!(abandoned = workers.len(), "宽限期已到，放弃未完成的消息，保持未确认");
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
    }
}

fn log_worker_exit(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        error!(error = %e, "订单处理任务 panic，消息保持未确认");
    }
}

/// 处理一条消息直到确认，或在关闭时放弃
///
/// 持有的在途额度在函数返回时释放。
async fn deliver<S: Subscription>(
    subscription: Arc<S>,
    ingestor: OrderIngestor,
    msg: ConsumerMessage,
    redelivery_wait: Duration,
    mut shutdown: watch::Receiver<bool>,
    _permit: OwnedSemaphorePermit,
) {
    let mut attempt: u32 = 1;
    loop {
        let span = info_span!(
            "ingest",
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            attempt
        );

        match ingestor.handle(&msg.payload).instrument(span).await {
            AckDecision::Ack => {
                if let Err(e) = subscription.ack(&msg) {
                    error!(
                        partition = msg.partition,
                        offset = msg.offset,
                        error = %e,
                        "提交位点失败，将随同分区后续的确认一并提交"
                    );
                }
                return;
            }
            AckDecision::Redeliver => {
                debug!(
                    partition = msg.partition,
                    offset = msg.offset,
                    attempt,
                    wait_secs = redelivery_wait.as_secs(),
                    "等待重投"
                );
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for(|stop| *stop) => {
                        info!(
                            partition = msg.partition,
                            offset = msg.offset,
                            attempt,
                            "关闭中，放弃等待重投的消息"
                        );
                        return;
                    }
                    _ = tokio::time::sleep(redelivery_wait) => {}
                }
                attempt += 1;
            }
        }
    }
}
