use crate::database::Database;
use crate::error::{parse_column, parse_decimal, trade_err};
use async_trait::async_trait;
use bourse_core::common::{OrderId, StockId, UserId};
use bourse_core::store::error::StoreError;
use bourse_core::trade::entity::{NewOrder, Order, OrderStatus};
use bourse_core::trade::error::TradeError;
use bourse_core::trade::port::OrderStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::info;

type OrderRow = (
    i64,
    i64,
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

const SELECT_ORDER: &str = "SELECT id, user_id, stock_id, order_type, quantity, price, status, \
     failure_reason, created_at, updated_at FROM orders";

fn order_from_row(r: OrderRow) -> Result<Order, StoreError> {
    Ok(Order {
        id: OrderId(r.0),
        user_id: UserId(r.1),
        stock_id: StockId(r.2),
        order_type: parse_column(&r.3)?,
        quantity: parse_decimal(&r.4)?,
        price: parse_decimal(&r.5)?,
        status: parse_column(&r.6)?,
        failure_reason: r.7,
        created_at: r.8,
        updated_at: r.9,
    })
}

/// 在给定连接 (可以是事务) 上读取订单
pub(crate) async fn fetch_order(
    conn: &mut SqliteConnection,
    id: OrderId,
) -> Result<Option<Order>, TradeError> {
    let sql = format!("{} WHERE id = ?", SELECT_ORDER);
    let row = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(trade_err)?;
    Ok(row.map(order_from_row).transpose()?)
}

/// # Summary
/// `OrderStore` 的 SQLite 实现。
///
/// # Invariants
/// * 状态迁移语句均带 `status = 'PENDING'` 条件，终态订单永远不会被改写。
pub struct SqliteOrderStore {
    db: Database,
}

impl SqliteOrderStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn query_orders(&self, sql: &str, bind: Option<i64>) -> Result<Vec<Order>, TradeError> {
        let mut query = sqlx::query_as::<_, OrderRow>(sql);
        if let Some(v) = bind {
            query = query.bind(v);
        }
        let rows = query.fetch_all(self.db.pool()).await.map_err(trade_err)?;
        Ok(rows
            .into_iter()
            .map(order_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn insert_order(&self, order: &NewOrder, quote: Decimal) -> Result<Order, TradeError> {
        let now = self.db.now();
        let result = sqlx::query(
            "INSERT INTO orders (user_id, stock_id, order_type, quantity, price, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?)",
        )
        .bind(order.user_id.0)
        .bind(order.stock_id.0)
        .bind(order.order_type.as_str())
        .bind(order.quantity.to_string())
        .bind(quote.to_string())
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await;

        let id = match result {
            Ok(done) => OrderId(done.last_insert_rowid()),
            // 股票已在定价时确认存在，外键失败只可能来自用户
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                return Err(TradeError::UserNotFound(order.user_id));
            }
            Err(e) => return Err(trade_err(e)),
        };

        info!(
            "Order {} placed: user={} stock={} {} {} quote={}",
            id, order.user_id, order.stock_id, order.order_type, order.quantity, quote
        );
        Ok(Order {
            id,
            user_id: order.user_id,
            stock_id: order.stock_id,
            order_type: order.order_type,
            quantity: order.quantity,
            price: quote,
            status: OrderStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, TradeError> {
        let mut conn = self.db.pool().acquire().await.map_err(trade_err)?;
        fetch_order(&mut *conn, id).await
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, TradeError> {
        let sql = format!("{} WHERE user_id = ? ORDER BY id DESC", SELECT_ORDER);
        self.query_orders(&sql, Some(user_id.0)).await
    }

    async fn list_pending(&self, before: DateTime<Utc>) -> Result<Vec<Order>, TradeError> {
        let sql = format!("{} WHERE status = 'PENDING' ORDER BY id ASC", SELECT_ORDER);
        let pending = self.query_orders(&sql, None).await?;
        // 时间戳以文本保存，时间比较放在内存里做
        Ok(pending.into_iter().filter(|o| o.created_at < before).collect())
    }

    async fn mark_failed(&self, id: OrderId, reason: &str) -> Result<bool, TradeError> {
        let updated = sqlx::query(
            "UPDATE orders SET status = 'FAILED', failure_reason = ?, updated_at = ? \
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(reason)
        .bind(self.db.now())
        .bind(id.0)
        .execute(self.db.pool())
        .await
        .map_err(trade_err)?
        .rows_affected();

        Ok(updated > 0)
    }
}
