use bourse_core::common::UserId;
use bourse_core::store::error::StoreError;
use bourse_core::store::port::{NewUser, Role, User, UserStore};
use bourse_core::trade::error::TradeError;
use bourse_core::trade::port::AccountPort;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

/// # Summary
/// 用户与现金账户服务。
///
/// 负责入参校验，余额变动与流水的原子写入交给 `AccountPort`。
pub struct AccountService {
    users: Arc<dyn UserStore>,
    accounts: Arc<dyn AccountPort>,
}

impl AccountService {
    pub fn new(users: Arc<dyn UserStore>, accounts: Arc<dyn AccountPort>) -> Self {
        Self { users, accounts }
    }

    fn require_positive(amount: Decimal) -> Result<(), TradeError> {
        if amount <= Decimal::ZERO {
            return Err(TradeError::InvalidInput(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        Ok(())
    }

    /// # Summary
    /// 注册用户，初始余额为 0。
    ///
    /// # Returns
    /// 邮箱格式非法返回 `StoreError::InvalidInput`，重复返回 `StoreError::Conflict`。
    pub async fn create_user(&self, email: &str, role: Role) -> Result<User, StoreError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(StoreError::InvalidInput(format!("invalid email {:?}", email)));
        }
        self.users.create_user(&NewUser { email, role }).await
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.users.get_user(id).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.users.list_users().await
    }

    pub async fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal, TradeError> {
        Self::require_positive(amount)?;
        self.accounts.deposit(user_id, amount).await
    }

    /// 出金，余额不足时返回 `InsufficientFunds` 且余额不变
    pub async fn withdraw(&self, user_id: UserId, amount: Decimal) -> Result<Decimal, TradeError> {
        Self::require_positive(amount)?;
        self.accounts.withdraw(user_id, amount).await.inspect_err(|e| {
            if matches!(e, TradeError::InsufficientFunds { .. }) {
                warn!("Withdrawal rejected for user {}: {}", user_id, e);
            }
        })
    }

    /// 管理端直接设置余额
    pub async fn set_balance(&self, user_id: UserId, balance: Decimal) -> Result<Decimal, TradeError> {
        if balance < Decimal::ZERO {
            return Err(TradeError::InvalidInput(format!(
                "balance must not be negative, got {}",
                balance
            )));
        }
        self.accounts.set_balance(user_id, balance).await
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Decimal, TradeError> {
        self.accounts.balance(user_id).await
    }
}
