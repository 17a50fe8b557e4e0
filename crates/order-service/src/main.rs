//! 订单查询服务入口
//!
//! 启动顺序：配置 -> 可观测性 -> 数据库（带重试）-> 缓存预热 -> 队列消费者 -> HTTP 服务。
//! 预热在消费者和 HTTP 服务启动之前同步完成。消费者或 HTTP 服务任一提前退出，
//! 整个进程随之关闭并以错误退出。

use std::sync::Arc;

use anyhow::Result;
use order_shared::{config::AppConfig, database::Database, observability};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use order_service::{
    cache::OrderCache,
    consumer::{ConsumerSettings, IngestionConsumer, KafkaSubscription, OrderIngestor},
    http,
    lookup::OrderLookupService,
    state::AppState,
    store::{OrderStore, PgOrderStore},
    warmup::warm_up,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load("order-service").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    // 2. 可观测性（日志格式随运行环境变化）
    let _guard =
        observability::init(&config.observability, &config.environment, &config.service_name)
            .await?;

    info!(environment = %config.environment, "Orders service is starting");

    // 3. 数据库连接，启动时按配置重试
    let db = Database::connect_with_retry(&config.database).await?;
    let store: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(db.pool().clone()));
    info!("Database connection established");

    // 4. 缓存预热，失败时以空缓存启动
    let cache = Arc::new(OrderCache::new(config.cache.capacity));
    warm_up(store.as_ref(), &cache, config.cache.warmup_size()).await;

    // 5. 队列消费者
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let subscription = KafkaSubscription::new(&config.kafka, &config.queue)?;
    let consumer = IngestionConsumer::new(
        subscription,
        OrderIngestor::new(Arc::clone(&store), Arc::clone(&cache)),
        ConsumerSettings::from(&config.queue),
    );
    let mut http_stop = shutdown_rx.clone();
    let mut consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    // 6. HTTP 服务
    let lookup = OrderLookupService::new(Arc::clone(&store), Arc::clone(&cache));
    let app = http::router(
        AppState::new(lookup, store),
        std::time::Duration::from_secs(config.server.request_timeout_secs),
    );

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Starting the http server on {}", config.server_addr());

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_stop.wait_for(|stop| *stop).await;
            })
            .await
    });

    // 7. 等待关闭信号；消费者或 HTTP 服务提前结束同样触发关闭
    let early_exit = wait_for_stop(shutdown_signal(), &mut consumer_task, &mut server).await;
    shutdown_tx.send_replace(true);

    // 8. 等待消费者排空在途消息并取消订阅，HTTP 服务排空连接
    let (consumer_exit, server_exit, consumer_stopped_early) = match early_exit {
        EarlyExit::Signal => (consumer_task.await, server.await, false),
        EarlyExit::Consumer(joined) => (joined, server.await, true),
        EarlyExit::Server(joined) => (consumer_task.await, joined, false),
    };

    db.close().await;

    let consumer_result = match consumer_exit {
        Ok(Ok(())) if consumer_stopped_early => {
            Err(anyhow::anyhow!("order consumer stopped before shutdown"))
        }
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::Error::from(e).context("order consumer failed")),
        Err(e) => Err(anyhow::Error::from(e).context("order consumer task failed")),
    };
    let server_result = match server_exit {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(e) => Err(anyhow::Error::from(e)),
    };

    if let Err(e) = &consumer_result {
        error!(error = %e, "Order consumer stopped");
    }
    if let Err(e) = &server_result {
        error!(error = %e, "HTTP server error");
    }
    info!("Service shutdown complete");
    consumer_result.and(server_result)
}

/// 提前结束的后台任务
enum EarlyExit<C, S> {
    Signal,
    Consumer(Result<C, JoinError>),
    Server(Result<S, JoinError>),
}

/// 等待关闭信号，或任一后台任务先行结束
async fn wait_for_stop<C, S>(
    signal: impl Future<Output = ()>,
    consumer: &mut JoinHandle<C>,
    server: &mut JoinHandle<S>,
) -> EarlyExit<C, S> {
    tokio::select! {
        _ = signal => EarlyExit::Signal,
        joined = consumer => {
            error!("Order consumer exited before shutdown, stopping service");
            EarlyExit::Consumer(joined)
        }
        joined = server => {
            error!("HTTP server exited before shutdown, stopping service");
            EarlyExit::Server(joined)
        }
    }
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
