use super::entity::{
    ExecutionReport, History, HistoryPage, NewHistory, NewOrder, Order, OrderType, Portfolio,
    Settlement, SettlementOutcome,
};
use super::error::TradeError;
use crate::common::{HistoryId, OrderId, StockId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

/// # Summary
/// 订单持久化接口。
///
/// # Invariants
/// - 订单行只由执行引擎修改。
/// - 状态迁移一律以 `status = 'PENDING'` 为前提条件写入 (compare-and-set)。
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// # Summary
    /// 以 `PENDING` 状态落库一张新订单。
    ///
    /// # Arguments
    /// * `order` - 已校验的下单意图
    /// * `quote` - 下单时刻的报价 (`单价 * 数量`)
    ///
    /// # Returns
    /// * `Err(TradeError::UserNotFound)` - 用户不存在
    async fn insert_order(&self, order: &NewOrder, quote: Decimal) -> Result<Order, TradeError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, TradeError>;

    /// 指定用户的全部订单，最新在前
    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, TradeError>;

    /// 创建时间早于 `before` 且仍为 `PENDING` 的订单，最早在前
    async fn list_pending(&self, before: DateTime<Utc>) -> Result<Vec<Order>, TradeError>;

    /// # Summary
    /// 将订单从 `PENDING` 迁移到 `FAILED` 并记录原因。
    ///
    /// # Returns
    /// * `Ok(true)` - 本次调用完成了迁移
    /// * `Ok(false)` - 订单已处于终态，未做修改
    async fn mark_failed(&self, id: OrderId, reason: &str) -> Result<bool, TradeError>;
}

/// # Summary
/// 持仓账本，串行化每个 (用户, 股票) 键上的读写。
///
/// # Invariants
/// - 同一键上的并发变动必须等价于按某种顺序依次应用，不允许丢失更新。
/// - 不同键之间互不阻塞。
#[async_trait]
pub trait PortfolioLedger: Send + Sync {
    /// 读取持仓，不存在返回 `None` (视为数量 0，不是错误)
    async fn get_position(
        &self,
        user_id: UserId,
        stock_id: StockId,
    ) -> Result<Option<Portfolio>, TradeError>;

    /// 指定用户的全部持仓
    async fn list_positions(&self, user_id: UserId) -> Result<Vec<Portfolio>, TradeError>;

    /// # Summary
    /// 原子地把带符号变动叠加到持仓上。
    ///
    /// # Logic
    /// 1. 读取当前数量与 `version`。
    /// 2. 计算新数量，若小于 0 则拒绝。
    /// 3. 以 `version` 为条件写回；条件不满足视为冲突并重试。
    ///
    /// # Returns
    /// * `Ok(Decimal)` - 变动后的数量
    /// * `Err(TradeError::NegativeHoldings)` - 结果将为负
    async fn apply_delta(
        &self,
        user_id: UserId,
        stock_id: StockId,
        delta: Decimal,
    ) -> Result<Decimal, TradeError>;
}

/// # Summary
/// 只追加的审计流水写入器。
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    /// # Summary
    /// 追加一条流水。要么持久化成功，要么返回错误，不存在部分写入。
    async fn record(&self, entry: &NewHistory) -> Result<HistoryId, TradeError>;

    /// # Summary
    /// 分页读取指定用户的流水，最新在前。
    async fn list_history(
        &self,
        user_id: UserId,
        page: HistoryPage,
    ) -> Result<Vec<History>, TradeError>;
}

/// # Summary
/// 订单结算的原子执行端口。
///
/// # Invariants
/// - 认领订单、卖出持仓校验、持仓变动、流水追加与状态迁移到 `COMPLETED` 在同一事务内完成，
///   任一步失败则全部回滚，订单保持 `PENDING`。
/// - 订单不处于 `PENDING` 时不产生任何副作用，返回 `AlreadyTerminal`。
#[async_trait]
pub trait SettlementPort: Send + Sync {
    async fn settle(&self, settlement: &Settlement) -> Result<SettlementOutcome, TradeError>;
}

/// # Summary
/// 现金账户端口，负责余额变动。
///
/// # Invariants
/// - 余额非负。
/// - 每次余额变动在同一事务内追加恰好一条流水。
#[async_trait]
pub trait AccountPort: Send + Sync {
    /// 入金，返回新余额
    async fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<Decimal, TradeError>;

    /// 出金，余额不足返回 `InsufficientFunds`，返回新余额
    async fn withdraw(&self, user_id: UserId, amount: Decimal) -> Result<Decimal, TradeError>;

    /// 管理端直接设置余额，流水记录差额
    async fn set_balance(&self, user_id: UserId, balance: Decimal) -> Result<Decimal, TradeError>;

    async fn balance(&self, user_id: UserId) -> Result<Decimal, TradeError>;
}

/// # Summary
/// 核心交易服务抽象接口，是外部协作方 (HTTP 层等) 下单与查询的唯一门户。
///
/// # Invariants
/// - 此接口必须是异步且线程安全的 (`Send + Sync`)。
/// - 任何执行路径返回后，订单要么是 `COMPLETED`，要么是 `FAILED`；
///   唯一的例外是调用方截止时间到期，此时订单保持 `PENDING` 且可安全重试。
#[async_trait]
pub trait TradePort: Send + Sync {
    /// 校验、定价并以 `PENDING` 落库
    async fn place_order(&self, order: NewOrder) -> Result<OrderId, TradeError>;

    /// 执行订单；对已处于终态的订单直接返回现有终态
    async fn execute_order(&self, order_id: OrderId) -> Result<ExecutionReport, TradeError>;

    /// 在截止时长内执行订单，超时返回 `TradeError::Timeout`
    async fn execute_order_within(
        &self,
        order_id: OrderId,
        deadline: Duration,
    ) -> Result<ExecutionReport, TradeError>;

    /// # Summary
    /// 同步地下单并执行。
    ///
    /// # Returns
    /// * `Err(TradeError::ExecutionFailed)` - 订单已落库但执行失败，订单已迁移到 `FAILED`
    /// * `Err(TradeError::Timeout)` - 截止时间到期，订单保持 `PENDING`
    /// * 其他错误 - 下单前即被拒绝，没有订单落库
    async fn place_and_execute(
        &self,
        user_id: UserId,
        stock_id: StockId,
        order_type: OrderType,
        quantity: Decimal,
    ) -> Result<ExecutionReport, TradeError>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, TradeError>;

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, TradeError>;

    async fn get_position(
        &self,
        user_id: UserId,
        stock_id: StockId,
    ) -> Result<Option<Portfolio>, TradeError>;

    async fn list_positions(&self, user_id: UserId) -> Result<Vec<Portfolio>, TradeError>;

    async fn list_history(
        &self,
        user_id: UserId,
        page: HistoryPage,
    ) -> Result<Vec<History>, TradeError>;
}
