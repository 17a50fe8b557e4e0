//! 订单发布工具
//!
//! 向订单 topic 发布消息，用于端到端演练消费链路：
//! 可以从 JSON 文件读取（单个对象或数组），也可以随机生成。
//! 文件内容按原样发布，不做校验，便于构造畸形消息。

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use fake::Fake;
use fake::faker::address::en::{CityName, StateName, StreetName, ZipCode};
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Word;
use fake::faker::name::en::Name;
use fake::faker::phone_number::en::PhoneNumber;
use order_shared::kafka::KafkaProducer;
use rand::Rng;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::models::{Delivery, Item, Order, Payment};

/// 随机生成一个合法订单
pub fn random_order() -> Order {
    let mut rng = rand::rng();
    let order_uid = Uuid::new_v4().simple().to_string();
    let track_number = format!("WBILM{}", rng.random_range(100_000..999_999));

    let item_count = rng.random_range(1..=4);
    let items: Vec<Item> = (0..item_count)
        .map(|_| random_item(&mut rng, &track_number))
        .collect();
    let goods_total: i64 = items.iter().map(|item| item.total_price).sum();
    let delivery_cost = rng.random_range(0..2_000);

    Order {
        order_uid: order_uid.clone(),
        track_number: track_number.clone(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: Name().fake(),
            phone: PhoneNumber().fake(),
            zip: ZipCode().fake(),
            city: CityName().fake(),
            address: format!("{} {}", StreetName().fake::<String>(), rng.random_range(1..200)),
            region: StateName().fake(),
            email: SafeEmail().fake(),
        },
        payment: Payment {
            transaction: order_uid,
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: goods_total + delivery_cost,
            payment_dt: Utc::now().timestamp(),
            bank: ["alpha", "sber", "tinkoff"][rng.random_range(0..3)].to_string(),
            delivery_cost,
            goods_total,
            custom_fee: 0,
        },
        items,
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: Word().fake(),
        delivery_service: "meest".to_string(),
        shardkey: rng.random_range(0..10).to_string(),
        sm_id: rng.random_range(1..100),
        date_created: Utc::now(),
        oof_shard: rng.random_range(0..3).to_string(),
    }
}

fn random_item(rng: &mut impl Rng, track_number: &str) -> Item {
    let price = rng.random_range(100..5_000);
    let sale = rng.random_range(0..60);
    Item {
        chrt_id: rng.random_range(1_000_000..9_999_999),
        track_number: track_number.to_string(),
        price,
        rid: Uuid::new_v4().simple().to_string(),
        name: Word().fake(),
        sale,
        size: rng.random_range(0..6).to_string(),
        total_price: price * (100 - sale) / 100,
        nm_id: rng.random_range(1_000_000..9_999_999),
        brand: CompanyName().fake(),
        status: 202,
    }
}

/// 读取订单文件，顶层为数组时逐个发布，否则作为单条消息
pub fn load_payloads(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取订单文件失败: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("订单文件不是合法 JSON: {}", path.display()))?;

    Ok(match value {
        Value::Array(values) => values,
        single => vec![single],
    })
}

/// 消息键取订单号，没有时为空
fn message_key(payload: &Value) -> &str {
    payload
        .get("order_uid")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// 依次发布负载，返回发布条数
pub async fn publish_payloads(
    producer: &KafkaProducer,
    topic: &str,
    payloads: &[Value],
) -> Result<usize> {
    for payload in payloads {
        let key = message_key(payload);
        let (partition, offset) = producer.send_json(topic, key, payload).await?;
        info!(topic, order_uid = key, partition, offset, "订单消息已发布");
    }
    Ok(payloads.len())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use validator::Validate;

    use super::*;
    use crate::testing::sample_order;

    #[test]
    fn test_random_order_is_valid() {
        for _ in 0..20 {
            let order = random_order();
            assert!(order.validate().is_ok());
            assert_eq!(
                order.payment.goods_total,
                order.items.iter().map(|i| i.total_price).sum::<i64>()
            );
        }
    }

    #[test]
    fn test_random_orders_have_unique_uids() {
        assert_ne!(random_order().order_uid, random_order().order_uid);
    }

    fn temp_file(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{name}", Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_single_and_array() {
        let order = serde_json::to_string(&sample_order("uid-1")).unwrap();

        let single = temp_file("single.json", &order);
        let payloads = load_payloads(&single).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(message_key(&payloads[0]), "uid-1");

        let array = temp_file("array.json", &format!("[{order}, {{\"broken\": true}}]"));
        let payloads = load_payloads(&array).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(message_key(&payloads[1]), "");

        let _ = std::fs::remove_file(single);
        let _ = std::fs::remove_file(array);
    }

    #[test]
    fn test_load_rejects_non_json() {
        let path = temp_file("bad.json", "not json");
        assert!(load_payloads(&path).is_err());
        let _ = std::fs::remove_file(path);
    }
}
