//! 订单领域模型
//!
//! 与队列中订单 JSON 文档一一对应。订单一旦落库即不可变，
//! 以 `order_uid` 作为全局唯一标识，重复到达视为重投而非更新。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// 订单
///
/// 长度上限与 `sql/orders.sql` 中的列定义一致，超长的订单在解码阶段即被拒绝。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "reject_nul_characters"))]
pub struct Order {
    #[validate(length(min = 1, max = 64, message = "order_uid 长度必须在 1-64 个字符之间"))]
    pub order_uid: String,
    #[validate(length(max = 64, message = "track_number 不能超过 64 个字符"))]
    pub track_number: String,
    #[validate(length(max = 32, message = "entry 不能超过 32 个字符"))]
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    #[validate(length(min = 1, message = "订单至少包含一个商品"))]
    #[validate(nested)]
    pub items: Vec<Item>,
    #[validate(length(max = 16, message = "locale 不能超过 16 个字符"))]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[validate(length(max = 64, message = "customer_id 不能超过 64 个字符"))]
    pub customer_id: String,
    #[validate(length(max = 64, message = "delivery_service 不能超过 64 个字符"))]
    pub delivery_service: String,
    #[validate(length(max = 16, message = "shardkey 不能超过 16 个字符"))]
    pub shardkey: String,
    pub sm_id: i64,
    /// 订单创建（接收）时间，RFC 3339
    pub date_created: DateTime<Utc>,
    #[validate(length(max = 16, message = "oof_shard 不能超过 16 个字符"))]
    pub oof_shard: String,
}

impl Order {
    /// 订单中所有文本字段，包括嵌套块
    fn text_fields(&self) -> impl Iterator<Item = &str> {
        let d = &self.delivery;
        let p = &self.payment;
        [
            &self.order_uid,
            &self.track_number,
            &self.entry,
            &self.locale,
            &self.internal_signature,
            &self.customer_id,
            &self.delivery_service,
            &self.shardkey,
            &self.oof_shard,
            &d.name,
            &d.phone,
            &d.zip,
            &d.city,
            &d.address,
            &d.region,
            &d.email,
            &p.transaction,
            &p.request_id,
            &p.currency,
            &p.provider,
            &p.bank,
        ]
        .into_iter()
        .chain(self.items.iter().flat_map(|item| {
            [
                &item.track_number,
                &item.rid,
                &item.name,
                &item.size,
                &item.brand,
            ]
        }))
        .map(String::as_str)
    }
}

/// PostgreSQL 的 TEXT 和 JSONB 都无法保存 NUL 字符
fn reject_nul_characters(order: &Order) -> Result<(), ValidationError> {
    if order.text_fields().any(|text| text.contains('\0')) {
        return Err(ValidationError::new("nul_character")
            .with_message("订单文本字段不能包含 NUL 字符".into()));
    }
    Ok(())
}

/// 收货信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// 支付信息
///
/// 金额字段均为最小货币单位的整数。`payment_dt` 为 Unix 秒级时间戳。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub transaction: String,
    #[serde(default)]
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    #[serde(default)]
    pub custom_fee: i64,
}

/// 订单商品行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    #[validate(length(min = 1, message = "商品名称不能为空"))]
    pub name: String,
    pub sale: i64,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_order;

    #[test]
    fn test_sample_order_is_valid() {
        assert!(sample_order("b563feb7b2b84b6test").validate().is_ok());
    }

    #[test]
    fn test_empty_uid_rejected() {
        let order = sample_order("");
        let errors = order.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("order_uid"));
    }

    #[test]
    fn test_empty_items_rejected() {
        let mut order = sample_order("uid-1");
        order.items.clear();
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_nameless_item_rejected() {
        let mut order = sample_order("uid-1");
        order.items[0].name.clear();
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_columns_longer_than_schema_rejected() {
        let order = sample_order(&"u".repeat(80));
        let errors = order.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("order_uid"));

        let mut order = sample_order("uid-1");
        order.customer_id = "c".repeat(65);
        assert!(order.validate().is_err());

        // 恰好 64 个字符可以落库
        assert!(sample_order(&"u".repeat(64)).validate().is_ok());
    }

    #[test]
    fn test_nul_character_rejected_anywhere() {
        let mut order = sample_order("uid-1");
        order.items[0].name = "Mas\0caras".to_string();
        assert!(order.validate().is_err());

        let mut order = sample_order("uid-2");
        order.delivery.city = "\0".to_string();
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_json_shape() {
        let order = sample_order("uid-json");
        let value = serde_json::to_value(&order).unwrap();

        assert_eq!(value["order_uid"], "uid-json");
        assert_eq!(value["payment"]["currency"], "USD");
        assert!(value["items"].is_array());
        // RFC 3339 字符串
        assert!(value["date_created"].as_str().unwrap().contains('T'));
    }
}
