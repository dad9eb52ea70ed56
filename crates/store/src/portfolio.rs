use crate::database::{Database, retry_on_conflict};
use crate::error::{parse_decimal, trade_err};
use async_trait::async_trait;
use bourse_core::common::{PortfolioId, StockId, UserId};
use bourse_core::store::error::StoreError;
use bourse_core::trade::entity::Portfolio;
use bourse_core::trade::error::TradeError;
use bourse_core::trade::port::PortfolioLedger;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::debug;

type PortfolioRow = (i64, i64, i64, String, i64, DateTime<Utc>);

const SELECT_PORTFOLIO: &str =
    "SELECT id, user_id, stock_id, quantity, version, updated_at FROM portfolios";

fn portfolio_from_row(r: PortfolioRow) -> Result<Portfolio, StoreError> {
    Ok(Portfolio {
        id: PortfolioId(r.0),
        user_id: UserId(r.1),
        stock_id: StockId(r.2),
        quantity: parse_decimal(&r.3)?,
        version: r.4,
        updated_at: r.5,
    })
}

/// 在给定连接 (可以是事务) 上读取持仓
pub(crate) async fn fetch_position(
    conn: &mut SqliteConnection,
    user_id: UserId,
    stock_id: StockId,
) -> Result<Option<Portfolio>, TradeError> {
    let sql = format!("{} WHERE user_id = ? AND stock_id = ?", SELECT_PORTFOLIO);
    let row = sqlx::query_as::<_, PortfolioRow>(&sql)
        .bind(user_id.0)
        .bind(stock_id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(trade_err)?;
    Ok(row.map(portfolio_from_row).transpose()?)
}

/// # Summary
/// 在给定连接上把带符号变动写入持仓，以 `version` 做比较交换。
///
/// # Logic
/// 1. 读取当前持仓；不存在时按 0 处理。
/// 2. 新数量溢出时返回 `InvalidInput`，小于 0 时返回 `NegativeHoldings`，均不写入。
/// 3. 行不存在则插入 `version = 1`；唯一约束冲突说明另一事务抢先建行。
/// 4. 行存在则 `WHERE version = ?` 更新；影响 0 行说明读取后被改写。
///
/// # Returns
/// * `Ok(Decimal)` - 写入后的数量
/// * `Err(TradeError::ConcurrentModification)` - 比较交换失败，调用方应重跑整个事务
pub(crate) async fn write_delta(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    user_id: UserId,
    stock_id: StockId,
    delta: Decimal,
) -> Result<Decimal, TradeError> {
    let current = fetch_position(conn, user_id, stock_id).await?;
    let held = current.as_ref().map(|p| p.quantity).unwrap_or(Decimal::ZERO);
    let next = held.checked_add(delta).ok_or_else(|| {
        TradeError::InvalidInput(format!(
            "portfolio ({}, {}) quantity {} + {} overflows",
            user_id, stock_id, held, delta
        ))
    })?;
    if next < Decimal::ZERO {
        return Err(TradeError::NegativeHoldings {
            current: held,
            delta,
        });
    }

    match current {
        None => {
            let inserted = sqlx::query(
                "INSERT INTO portfolios (user_id, stock_id, quantity, version, updated_at) \
                 VALUES (?, ?, ?, 1, ?)",
            )
            .bind(user_id.0)
            .bind(stock_id.0)
            .bind(next.to_string())
            .bind(now)
            .execute(&mut *conn)
            .await;

            match inserted {
                Ok(_) => {}
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    return Err(TradeError::ConcurrentModification(format!(
                        "portfolio ({}, {}) created concurrently",
                        user_id, stock_id
                    )));
                }
                Err(e) => return Err(trade_err(e)),
            }
        }
        Some(p) => {
            let updated = sqlx::query(
                "UPDATE portfolios SET quantity = ?, version = version + 1, updated_at = ? \
                 WHERE id = ? AND version = ?",
            )
            .bind(next.to_string())
            .bind(now)
            .bind(p.id.0)
            .bind(p.version)
            .execute(&mut *conn)
            .await
            .map_err(trade_err)?
            .rows_affected();

            if updated == 0 {
                return Err(TradeError::ConcurrentModification(format!(
                    "portfolio {} moved past version {}",
                    p.id, p.version
                )));
            }
        }
    }

    debug!(
        "Portfolio ({}, {}) {} -> {}",
        user_id, stock_id, held, next
    );
    Ok(next)
}

/// # Summary
/// `PortfolioLedger` 的 SQLite 实现。
///
/// # Invariants
/// * 持仓写入只经过 `write_delta`，因此同一键上的并发变动不会丢失更新。
pub struct SqlitePortfolioLedger {
    db: Database,
}

impl SqlitePortfolioLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn apply_once(
        &self,
        user_id: UserId,
        stock_id: StockId,
        delta: Decimal,
    ) -> Result<Decimal, TradeError> {
        let mut tx = self.db.pool().begin().await.map_err(trade_err)?;
        // 先写后读：拿到写锁之后再读取 version
        sqlx::query("UPDATE portfolios SET version = version WHERE user_id = ? AND stock_id = ?")
            .bind(user_id.0)
            .bind(stock_id.0)
            .execute(&mut *tx)
            .await
            .map_err(trade_err)?;
        let next = write_delta(&mut *tx, self.db.now(), user_id, stock_id, delta).await?;
        tx.commit().await.map_err(trade_err)?;
        Ok(next)
    }
}

#[async_trait]
impl PortfolioLedger for SqlitePortfolioLedger {
    async fn get_position(
        &self,
        user_id: UserId,
        stock_id: StockId,
    ) -> Result<Option<Portfolio>, TradeError> {
        let mut conn = self.db.pool().acquire().await.map_err(trade_err)?;
        fetch_position(&mut *conn, user_id, stock_id).await
    }

    async fn list_positions(&self, user_id: UserId) -> Result<Vec<Portfolio>, TradeError> {
        let sql = format!("{} WHERE user_id = ? ORDER BY stock_id ASC", SELECT_PORTFOLIO);
        let rows = sqlx::query_as::<_, PortfolioRow>(&sql)
            .bind(user_id.0)
            .fetch_all(self.db.pool())
            .await
            .map_err(trade_err)?;
        Ok(rows
            .into_iter()
            .map(portfolio_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn apply_delta(
        &self,
        user_id: UserId,
        stock_id: StockId,
        delta: Decimal,
    ) -> Result<Decimal, TradeError> {
        retry_on_conflict("apply_delta", || self.apply_once(user_id, stock_id, delta)).await
    }
}
