//! 订单发布命令行工具
//!
//! 向订单 topic 发布消息，用于在本地演练完整的消费链路。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use order_shared::config::AppConfig;
use order_shared::kafka::KafkaProducer;
use order_shared::observability::tracing::{self as obs_tracing, LogSettings};
use tracing::info;

use order_service::publisher::{load_payloads, publish_payloads, random_order};

#[derive(Parser, Debug)]
#[command(name = "order-publisher")]
#[command(version, about = "向订单 topic 发布测试订单")]
struct Cli {
    /// Kafka brokers 地址，默认取配置文件
    #[arg(long)]
    brokers: Option<String>,

    /// 目标 topic，默认取配置文件
    #[arg(long)]
    topic: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 发布 JSON 文件中的订单（单个对象或数组），内容按原样发送
    File {
        path: PathBuf,
    },

    /// 随机生成订单并发布
    Generate {
        /// 生成数量
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// 两条消息之间的间隔（毫秒）
        #[arg(long, default_value = "0")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load("order-publisher").unwrap_or_default();
    obs_tracing::init(&LogSettings::resolve(&config.observability, &config.environment))?;

    if let Some(brokers) = cli.brokers {
        config.kafka.brokers = brokers;
    }
    let topic = cli.topic.unwrap_or_else(|| config.queue.topic.clone());
    let producer = KafkaProducer::new(&config.kafka)?;

    let published = match cli.command {
        Commands::File { path } => {
            let payloads = load_payloads(&path)?;
            publish_payloads(&producer, &topic, &payloads).await?
        }
        Commands::Generate { count, interval_ms } => {
            let mut published = 0;
            for i in 0..count {
                if i > 0 && interval_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
                let payload = serde_json::to_value(random_order())?;
                published += publish_payloads(&producer, &topic, &[payload]).await?;
            }
            published
        }
    };

    info!(topic = %topic, published, "发布完成");
    Ok(())
}
