use bourse_core::store::error::StoreError;
use bourse_core::trade::error::TradeError;
use rust_decimal::Decimal;
use std::str::FromStr;

// SQLITE_BUSY / SQLITE_LOCKED 及其扩展码 (BUSY_RECOVERY, BUSY_SNAPSHOT, LOCKED_SHAREDCACHE)
const BUSY_CODES: [&str; 6] = ["5", "6", "261", "262", "517", "773"];

/// 写锁竞争或快照过期，原样重试即可
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| BUSY_CODES.contains(&code.as_ref())),
        _ => false,
    }
}

/// 交易域的 sqlx 错误映射
pub(crate) fn trade_err(err: sqlx::Error) -> TradeError {
    if is_busy(&err) {
        TradeError::ConcurrentModification(err.to_string())
    } else {
        TradeError::PersistenceFailure(err.to_string())
    }
}

/// 元数据域的 sqlx 错误映射
pub(crate) fn store_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

/// 金额、数量以 TEXT 保存，读取时还原为 Decimal
pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|e| StoreError::Database(format!("corrupt decimal {:?}: {}", raw, e)))
}

/// 枚举列以大写文本保存
pub(crate) fn parse_column<T: FromStr>(raw: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| StoreError::Database(e.to_string()))
}
