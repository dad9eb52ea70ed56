use super::error::StoreError;
use crate::common::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 用户角色。鉴权策略不在本系统内，角色仅作为数据随用户保存。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Trader,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Trader => "TRADER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRADER" => Ok(Role::Trader),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// # Summary
/// 用户实体，持有现金余额。
///
/// # Invariants
/// - `email` 全局唯一。
/// - `balance` 非负，只能经由 `AccountPort` 修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub role: Role,
    // 可用现金余额
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// # Summary
/// 新建用户的请求，初始余额为零。
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub role: Role,
}

/// # Summary
/// 用户数据存储接口。
#[async_trait]
pub trait UserStore: Send + Sync {
    /// # Summary
    /// 创建用户。
    ///
    /// # Returns
    /// 返回完整实体；`email` 重复时返回 `StoreError::Conflict`。
    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError>;

    /// # Summary
    /// 获取用户信息。不存在返回 `None`。
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// # Summary
    /// 列出全部用户，按 ID 倒序。
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
}
