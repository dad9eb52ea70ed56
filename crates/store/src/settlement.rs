use crate::database::Database;
use crate::error::trade_err;
use crate::history::insert_history;
use crate::order::fetch_order;
use crate::portfolio::{fetch_position, write_delta};
use async_trait::async_trait;
use bourse_core::trade::entity::{NewHistory, OrderType, Settlement, SettlementOutcome};
use bourse_core::trade::error::TradeError;
use bourse_core::trade::port::SettlementPort;
use rust_decimal::Decimal;
use tracing::info;

/// # Summary
/// `SettlementPort` 的 SQLite 实现：一次结算就是一个事务。
///
/// # Logic
/// 1. 以写语句认领订单 (`status = 'PENDING'` 为条件刷新 `updated_at`)。
///    事务的第一条语句是写，后来者在 `busy_timeout` 内排队，而不是在过期快照上失败。
/// 2. 认领失败：订单不存在返回 `OrderNotFound`，否则返回 `AlreadyTerminal`。
/// 3. 计算成交总额 (溢出即失败)，卖出时校验持仓。
/// 4. 写持仓、追加流水、把订单定格为 `COMPLETED`，提交。
///
/// # Invariants
/// * 任一步返回错误时事务随 `Transaction` 析构回滚，订单保持 `PENDING`。
pub struct SqliteSettlementStore {
    db: Database,
}

impl SqliteSettlementStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettlementPort for SqliteSettlementStore {
    async fn settle(&self, s: &Settlement) -> Result<SettlementOutcome, TradeError> {
        let now = self.db.now();
        let mut tx = self.db.pool().begin().await.map_err(trade_err)?;

        let claimed = sqlx::query(
            "UPDATE orders SET updated_at = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(now)
        .bind(s.order_id.0)
        .execute(&mut *tx)
        .await
        .map_err(trade_err)?
        .rows_affected();

        if claimed == 0 {
            let existing = fetch_order(&mut *tx, s.order_id).await?;
            return match existing {
                Some(order) => Ok(SettlementOutcome::AlreadyTerminal(order)),
                None => Err(TradeError::OrderNotFound(s.order_id)),
            };
        }

        let amount = s.amount()?;

        if s.order_type == OrderType::Sell {
            let held = fetch_position(&mut *tx, s.user_id, s.stock_id)
                .await?
                .map(|p| p.quantity)
                .unwrap_or(Decimal::ZERO);
            if held < s.quantity {
                return Err(TradeError::InsufficientHoldings {
                    held,
                    requested: s.quantity,
                });
            }
        }

        let position = write_delta(&mut *tx, now, s.user_id, s.stock_id, s.signed_delta()).await?;

        let history_id = insert_history(
            &mut *tx,
            now,
            &NewHistory {
                user_id: s.user_id,
                order_id: Some(s.order_id),
                stock_id: Some(s.stock_id),
                action: s.order_type.history_action(),
                details: format!(
                    "{} {} of stock {} at {} (order {})",
                    s.order_type, s.quantity, s.stock_id, s.unit_price, s.order_id
                ),
                amount,
            },
        )
        .await?;

        sqlx::query("UPDATE orders SET price = ?, status = 'COMPLETED', updated_at = ? WHERE id = ?")
            .bind(amount.to_string())
            .bind(now)
            .bind(s.order_id.0)
            .execute(&mut *tx)
            .await
            .map_err(trade_err)?;

        let order = fetch_order(&mut *tx, s.order_id)
            .await?
            .ok_or(TradeError::OrderNotFound(s.order_id))?;

        tx.commit().await.map_err(trade_err)?;

        info!(
            "Order {} settled: {} {} @ {} => position {}",
            s.order_id, s.order_type, s.quantity, s.unit_price, position
        );
        Ok(SettlementOutcome::Completed {
            order,
            history_id,
            position,
        })
    }
}
