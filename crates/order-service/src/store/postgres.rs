//! PostgreSQL 订单存储
//!
//! 每个订单一行，`order_uid` 为主键；收货、支付、商品三个嵌套块以 JSONB 存储。
//! 表结构见 `sql/orders.sql`。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::{debug, instrument};

use super::OrderStore;
use crate::error::{OrderError, Result};
use crate::models::{Delivery, Item, Order, Payment};

/// `orders` 表的一行
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_uid: String,
    track_number: String,
    entry: String,
    delivery: Json<Delivery>,
    payment: Json<Payment>,
    items: Json<Vec<Item>>,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i64,
    date_created: DateTime<Utc>,
    oof_shard: String,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            order_uid: row.order_uid,
            track_number: row.track_number,
            entry: row.entry,
            delivery: row.delivery.0,
            payment: row.payment.0,
            items: row.items.0,
            locale: row.locale,
            internal_signature: row.internal_signature,
            customer_id: row.customer_id,
            delivery_service: row.delivery_service,
            shardkey: row.shardkey,
            sm_id: row.sm_id,
            date_created: row.date_created,
            oof_shard: row.oof_shard,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    order_uid, track_number, entry, delivery, payment, items, locale,
    internal_signature, customer_id, delivery_service, shardkey, sm_id,
    date_created, oof_shard
"#;

/// 基于 sqlx 连接池的订单存储
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// SQLSTATE 22 类（数据异常）和 23 类（完整性约束冲突）由数据本身引起，重试不会改变结果
fn is_permanent_sqlstate(code: &str) -> bool {
    code.starts_with("22") || code.starts_with("23")
}

/// 写入错误分类
///
/// 唯一约束冲突为重复订单，数据异常和其他约束冲突为永久拒绝，其余视为暂时性故障。
fn map_save_error(order_uid: &str, err: sqlx::Error) -> OrderError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return OrderError::DuplicateKey {
                order_uid: order_uid.to_string(),
            };
        }
        if db_err.code().is_some_and(|code| is_permanent_sqlstate(&code)) {
            return OrderError::Rejected {
                order_uid: order_uid.to_string(),
                reason: db_err.message().to_string(),
            };
        }
    }
    OrderError::from(err)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    async fn save(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                order_uid, track_number, entry, delivery, payment, items, locale,
                internal_signature, customer_id, delivery_service, shardkey, sm_id,
                date_created, oof_shard
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(Json(&order.delivery))
        .bind(Json(&order.payment))
        .bind(Json(&order.items))
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .execute(&self.pool)
        .await
        .map_err(|e| map_save_error(&order.order_uid, e))?;

        debug!("订单已写入数据库");
        Ok(())
    }

    async fn get(&self, order_uid: &str) -> Result<Option<Order>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM orders WHERE order_uid = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Order::from))
    }

    async fn load_recent(&self, limit: usize) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM orders ORDER BY date_created DESC, order_uid DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        // 倒序取最新的 N 条，再翻转成最新在最后
        let mut orders: Vec<Order> = rows.into_iter().map(Order::from).collect();
        orders.reverse();
        Ok(orders)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
