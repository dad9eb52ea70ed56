use crate::database::Database;
use crate::error::{parse_column, parse_decimal, trade_err};
use async_trait::async_trait;
use bourse_core::common::{HistoryId, OrderId, StockId, UserId};
use bourse_core::store::error::StoreError;
use bourse_core::trade::entity::{History, HistoryPage, NewHistory};
use bourse_core::trade::error::TradeError;
use bourse_core::trade::port::HistoryRecorder;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

type HistoryRow = (
    i64,
    i64,
    Option<i64>,
    Option<i64>,
    String,
    String,
    String,
    DateTime<Utc>,
);

fn history_from_row(r: HistoryRow) -> Result<History, StoreError> {
    Ok(History {
        id: HistoryId(r.0),
        user_id: UserId(r.1),
        order_id: r.2.map(OrderId),
        stock_id: r.3.map(StockId),
        action: parse_column(&r.4)?,
        details: r.5,
        amount: parse_decimal(&r.6)?,
        created_at: r.7,
    })
}

/// 在给定连接 (可以是事务) 上追加一条流水
pub(crate) async fn insert_history(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    entry: &NewHistory,
) -> Result<HistoryId, TradeError> {
    let id = sqlx::query(
        "INSERT INTO history (user_id, order_id, stock_id, action, details, amount, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.user_id.0)
    .bind(entry.order_id.map(|o| o.0))
    .bind(entry.stock_id.map(|s| s.0))
    .bind(entry.action.as_str())
    .bind(&entry.details)
    .bind(entry.amount.to_string())
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(trade_err)?
    .last_insert_rowid();

    Ok(HistoryId(id))
}

/// # Summary
/// `HistoryRecorder` 的 SQLite 实现。
///
/// # Invariants
/// * `history` 表由触发器保护，任何 UPDATE / DELETE 都会被数据库拒绝。
pub struct SqliteHistoryRecorder {
    db: Database,
}

impl SqliteHistoryRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HistoryRecorder for SqliteHistoryRecorder {
    async fn record(&self, entry: &NewHistory) -> Result<HistoryId, TradeError> {
        let mut conn = self.db.pool().acquire().await.map_err(trade_err)?;
        insert_history(&mut *conn, self.db.now(), entry).await
    }

    async fn list_history(
        &self,
        user_id: UserId,
        page: HistoryPage,
    ) -> Result<Vec<History>, TradeError> {
        if page.limit <= 0 {
            return Err(TradeError::InvalidInput(format!(
                "page limit must be positive, got {}",
                page.limit
            )));
        }

        let before = page.before.map(|h| h.0);
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, user_id, order_id, stock_id, action, details, amount, created_at \
             FROM history WHERE user_id = ? AND (? IS NULL OR id < ?) \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id.0)
        .bind(before)
        .bind(before)
        .bind(page.limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(trade_err)?;

        Ok(rows
            .into_iter()
            .map(history_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
