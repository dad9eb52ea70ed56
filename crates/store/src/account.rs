use crate::database::{Database, retry_on_conflict};
use crate::error::{parse_column, parse_decimal, store_err, trade_err};
use crate::history::insert_history;
use async_trait::async_trait;
use bourse_core::common::UserId;
use bourse_core::store::error::StoreError;
use bourse_core::store::port::{NewUser, User, UserStore};
use bourse_core::trade::entity::{HistoryAction, NewHistory};
use bourse_core::trade::error::TradeError;
use bourse_core::trade::port::AccountPort;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

type UserRow = (i64, String, String, String, DateTime<Utc>);

fn user_from_row(r: UserRow) -> Result<User, StoreError> {
    Ok(User {
        id: UserId(r.0),
        email: r.1,
        role: parse_column(&r.2)?,
        balance: parse_decimal(&r.3)?,
        created_at: r.4,
    })
}

/// 余额变动方式
#[derive(Debug, Clone, Copy)]
enum BalanceChange {
    Add(Decimal),
    Subtract(Decimal),
    Set(Decimal),
}

impl BalanceChange {
    fn action(&self) -> HistoryAction {
        match self {
            BalanceChange::Add(_) => HistoryAction::Deposit,
            BalanceChange::Subtract(_) => HistoryAction::Withdraw,
            BalanceChange::Set(_) => HistoryAction::BalanceUpdate,
        }
    }

    /// 返回 (新余额, 流水金额)
    fn apply(&self, current: Decimal) -> Result<(Decimal, Decimal), TradeError> {
        match *self {
            BalanceChange::Add(amount) => current
                .checked_add(amount)
                .map(|next| (next, amount))
                .ok_or_else(|| {
                    TradeError::InvalidInput(format!("balance {} + {} overflows", current, amount))
                }),
            BalanceChange::Subtract(amount) if amount > current => Err(TradeError::InsufficientFunds {
                required: amount,
                actual: current,
            }),
            BalanceChange::Subtract(amount) => current
                .checked_sub(amount)
                .map(|next| (next, amount))
                .ok_or_else(|| {
                    TradeError::InvalidInput(format!("balance {} - {} overflows", current, amount))
                }),
            BalanceChange::Set(balance) if balance < Decimal::ZERO => Err(TradeError::InvalidInput(
                format!("balance must not be negative, got {}", balance),
            )),
            BalanceChange::Set(balance) => Ok((balance, balance - current)),
        }
    }
}

/// # Summary
/// 用户与现金余额的 SQLite 实现，同时提供 `UserStore` 与 `AccountPort`。
///
/// # Invariants
/// * 余额变动与对应流水在同一事务内写入。
/// * 事务以一条空写 (`balance = balance`) 开始，先拿到写锁再读余额，读到的值不会过期。
pub struct SqliteAccountStore {
    db: Database,
}

impl SqliteAccountStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn adjust_once(&self, user_id: UserId, change: BalanceChange) -> Result<Decimal, TradeError> {
        let now = self.db.now();
        let mut tx = self.db.pool().begin().await.map_err(trade_err)?;

        let locked = sqlx::query("UPDATE users SET balance = balance WHERE id = ?")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await
            .map_err(trade_err)?
            .rows_affected();
        if locked == 0 {
            return Err(TradeError::UserNotFound(user_id));
        }

        let raw: String = sqlx::query_scalar("SELECT balance FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(trade_err)?;
        let current = parse_decimal(&raw)?;
        let (next, amount) = change.apply(current)?;

        sqlx::query("UPDATE users SET balance = ? WHERE id = ?")
            .bind(next.to_string())
            .bind(user_id.0)
            .execute(&mut *tx)
            .await
            .map_err(trade_err)?;

        let action = change.action();
        insert_history(
            &mut *tx,
            now,
            &NewHistory {
                user_id,
                order_id: None,
                stock_id: None,
                action,
                details: format!("{} {} -> {}", action, current, next),
                amount,
            },
        )
        .await?;

        tx.commit().await.map_err(trade_err)?;
        info!("User {} balance {} -> {} ({})", user_id, current, next, action);
        Ok(next)
    }

    async fn adjust(&self, user_id: UserId, change: BalanceChange) -> Result<Decimal, TradeError> {
        retry_on_conflict("adjust_balance", || self.adjust_once(user_id, change)).await
    }
}

#[async_trait]
impl UserStore for SqliteAccountStore {
    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let now = self.db.now();
        let id = sqlx::query("INSERT INTO users (email, role, balance, created_at) VALUES (?, ?, '0', ?)")
            .bind(&user.email)
            .bind(user.role.as_str())
            .bind(now)
            .execute(self.db.pool())
            .await
            .map_err(store_err)?
            .last_insert_rowid();

        info!("User {} registered as {} ({})", id, user.email, user.role);
        Ok(User {
            id: UserId(id),
            email: user.email.clone(),
            role: user.role,
            balance: Decimal::ZERO,
            created_at: now,
        })
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT id, email, role, balance, created_at FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(self.db.pool())
            .await
            .map_err(store_err)?
            .map(user_from_row)
            .transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT id, email, role, balance, created_at FROM users ORDER BY id DESC")
            .fetch_all(self.db.pool())
            .await
            .map_err(store_err)?
            .into_iter()
            .map(user_from_row)
            .collect()
    }
}

#[async_trait]
impl AccountPort for SqliteAccountStore {
    async fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal, TradeError> {
        self.adjust(user_id, BalanceChange::Add(amount)).await
    }

    async fn withdraw(&self, user_id: UserId, amount: Decimal) -> Result<Decimal, TradeError> {
        self.adjust(user_id, BalanceChange::Subtract(amount)).await
    }

    async fn set_balance(&self, user_id: UserId, balance: Decimal) -> Result<Decimal, TradeError> {
        self.adjust(user_id, BalanceChange::Set(balance)).await
    }

    async fn balance(&self, user_id: UserId) -> Result<Decimal, TradeError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT balance FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(self.db.pool())
            .await
            .map_err(trade_err)?;
        match raw {
            Some(b) => Ok(parse_decimal(&b)?),
            None => Err(TradeError::UserNotFound(user_id)),
        }
    }
}
