use crate::common::StockId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// # Summary
/// 可交易的股票标的及其当前单价。
///
/// # Invariants
/// - `symbol` 全局唯一。
/// - `price` 严格为正，仅由管理操作修改。
/// - 订单不保存独立的价格快照，结算时总是重新读取本行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    // 交易代码 (例如: AAPL)
    pub symbol: String,
    // 公司名称
    pub name: String,
    // 当前单价
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// # Summary
/// 新建股票的请求。
#[derive(Debug, Clone)]
pub struct NewStock {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}
