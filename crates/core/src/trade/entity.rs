use super::error::TradeError;
use crate::common::{HistoryId, OrderId, PortfolioId, StockId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 订单的交易方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// 买入
    Buy,
    /// 卖出
    Sell,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Buy => "BUY",
            OrderType::Sell => "SELL",
        }
    }

    /// # Logic
    /// 把委托数量换算为持仓的带符号变动：买入为正，卖出为负。
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            OrderType::Buy => quantity,
            OrderType::Sell => -quantity,
        }
    }

    /// 成交后写入审计流水时使用的动作
    pub fn history_action(&self) -> HistoryAction {
        match self {
            OrderType::Buy => HistoryAction::Buy,
            OrderType::Sell => HistoryAction::Sell,
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderType::Buy),
            "SELL" => Ok(OrderType::Sell),
            _ => Err(TradeError::InvalidInput(format!(
                "order type must be BUY or SELL, got {:?}",
                s
            ))),
        }
    }
}

/// # Summary
/// 订单的生命周期状态。
///
/// # Invariants
/// - 唯一合法的迁移是 `Pending -> Completed` 与 `Pending -> Failed`。
/// - `Completed` 与 `Failed` 均为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// 已创建，尚未结算
    Pending,
    /// 持仓与流水均已落库
    Completed,
    /// 执行失败，持仓未发生变动
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// # Summary
/// 用户下单意图，尚未分配 ID。
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub stock_id: StockId,
    pub order_type: OrderType,
    pub quantity: Decimal,
}

impl NewOrder {
    pub fn new(user_id: UserId, stock_id: StockId, order_type: OrderType, quantity: Decimal) -> Self {
        Self {
            user_id,
            stock_id,
            order_type,
            quantity,
        }
    }

    /// # Logic
    /// 在任何写操作之前拒绝非正数量。
    pub fn validate(&self) -> Result<(), TradeError> {
        if self.quantity <= Decimal::ZERO {
            return Err(TradeError::InvalidInput(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        Ok(())
    }

    /// # Summary
    /// 按给定单价计算报价 `单价 * 数量`。
    ///
    /// # Returns
    /// 结果超出 `Decimal` 表示范围时返回 `InvalidInput`。
    pub fn quote(&self, unit_price: Decimal) -> Result<Decimal, TradeError> {
        total(unit_price, self.quantity)
    }
}

/// # Summary
/// 持久化后的订单。
///
/// # Invariants
/// - `quantity` 创建后不可变。
/// - `price` 在进入 `Completed` 时被定格为 `执行时单价 * quantity`，之后不再重算；
///   `Pending` 期间它只是下单时的报价。
/// - `failure_reason` 仅在 `Failed` 时有值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub stock_id: StockId,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// 持仓带符号变动
    pub fn signed_delta(&self) -> Decimal {
        self.order_type.signed(self.quantity)
    }

    /// 以给定单价为本单生成结算指令
    pub fn settlement(&self, unit_price: Decimal) -> Settlement {
        Settlement {
            order_id: self.id,
            user_id: self.user_id,
            stock_id: self.stock_id,
            order_type: self.order_type,
            quantity: self.quantity,
            unit_price,
        }
    }
}

fn total(unit_price: Decimal, quantity: Decimal) -> Result<Decimal, TradeError> {
    unit_price.checked_mul(quantity).ok_or_else(|| {
        TradeError::InvalidInput(format!(
            "{} x {} exceeds the representable amount",
            unit_price, quantity
        ))
    })
}

/// # Summary
/// 一次原子结算的全部输入。
///
/// 持仓变动、审计流水追加与订单状态迁移必须在同一事务内完成。
#[derive(Debug, Clone)]
pub struct Settlement {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub stock_id: StockId,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// 执行时刻从权威存储读取的单价
    pub unit_price: Decimal,
}

impl Settlement {
    /// 成交总额，写入 `Order.price` 与 `History.amount`；溢出返回 `InvalidInput`
    pub fn amount(&self) -> Result<Decimal, TradeError> {
        total(self.unit_price, self.quantity)
    }

    pub fn signed_delta(&self) -> Decimal {
        self.order_type.signed(self.quantity)
    }
}

/// # Summary
/// 结算的结果。
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    /// 本次调用完成了结算
    Completed {
        order: Order,
        history_id: HistoryId,
        position: Decimal,
    },
    /// 订单在本次调用之前已进入终态，未产生任何副作用
    AlreadyTerminal(Order),
}

/// # Summary
/// 对调用方暴露的执行回执。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub price: Decimal,
    pub failure_reason: Option<String>,
}

impl From<&Order> for ExecutionReport {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            price: order.price,
            failure_reason: order.failure_reason.clone(),
        }
    }
}

/// # Summary
/// 指定用户在指定股票上的持仓。
///
/// # Invariants
/// - `quantity >= 0`。
/// - 每次写入 `version` 自增 1，写入时必须比对读取到的 `version`。
/// - 任意时刻 `quantity` 等于该键下所有 BUY/SELL 流水的带符号数量之和。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: PortfolioId,
    pub user_id: UserId,
    pub stock_id: StockId,
    pub quantity: Decimal,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// # Summary
/// 审计流水的动作类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Buy,
    Sell,
    BalanceUpdate,
    Deposit,
    Withdraw,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Buy => "BUY",
            HistoryAction::Sell => "SELL",
            HistoryAction::BalanceUpdate => "BALANCE_UPDATE",
            HistoryAction::Deposit => "DEPOSIT",
            HistoryAction::Withdraw => "WITHDRAW",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(HistoryAction::Buy),
            "SELL" => Ok(HistoryAction::Sell),
            "BALANCE_UPDATE" => Ok(HistoryAction::BalanceUpdate),
            "DEPOSIT" => Ok(HistoryAction::Deposit),
            "WITHDRAW" => Ok(HistoryAction::Withdraw),
            _ => Err(format!("Unknown history action: {}", s)),
        }
    }
}

/// # Summary
/// 不可变的审计流水。
///
/// # Invariants
/// - 只追加，写入后永不更新或删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: HistoryId,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub stock_id: Option<StockId>,
    pub action: HistoryAction,
    pub details: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// # Summary
/// 追加流水的请求。
#[derive(Debug, Clone)]
pub struct NewHistory {
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub stock_id: Option<StockId>,
    pub action: HistoryAction,
    pub details: String,
    pub amount: Decimal,
}

/// # Summary
/// 流水分页游标：按 ID 倒序（最新在前），`before` 为上一页最后一条的 ID。
#[derive(Debug, Clone, Copy)]
pub struct HistoryPage {
    pub limit: i64,
    pub before: Option<HistoryId>,
}

impl HistoryPage {
    pub const DEFAULT_LIMIT: i64 = 50;

    /// 第一页
    pub fn first(limit: i64) -> Self {
        Self { limit, before: None }
    }

    /// 紧随给定流水之后（更早）的一页
    pub fn after(last: &History, limit: i64) -> Self {
        Self {
            limit,
            before: Some(last.id),
        }
    }
}

impl Default for HistoryPage {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}
