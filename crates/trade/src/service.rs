use async_trait::async_trait;
use bourse_core::common::time::TimeProvider;
use bourse_core::common::{OrderId, StockId, UserId};
use bourse_core::config::TradeConfig;
use bourse_core::stock::port::PriceOracle;
use bourse_core::trade::entity::{
    ExecutionReport, History, HistoryPage, NewOrder, Order, OrderStatus, OrderType, Portfolio,
    SettlementOutcome,
};
use bourse_core::trade::error::TradeError;
use bourse_core::trade::port::{
    HistoryRecorder, OrderStore, PortfolioLedger, SettlementPort, TradePort,
};
use futures::StreamExt;
use futures::stream;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 启动回收时同时执行的订单数
const RECOVERY_CONCURRENCY: usize = 4;

/// # Summary
/// 一次滞留订单回收的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 扫描到的 `PENDING` 订单数
    pub scanned: usize,
    pub completed: usize,
    pub failed: usize,
}

/// # Summary
/// 订单执行引擎，实现 `TradePort`。
///
/// # Invariants
/// - 执行时刻的单价是权威价格，覆盖下单时的报价。
/// - 执行返回错误时订单已被迁移到 `FAILED` (截止时间到期除外，此时保持 `PENDING`)。
/// - 服务本身无状态，不持有任何跨 I/O 的进程内锁，可被任意多个任务共享。
pub struct TradeService {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<dyn PortfolioLedger>,
    history: Arc<dyn HistoryRecorder>,
    settlement: Arc<dyn SettlementPort>,
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn TimeProvider>,
    config: TradeConfig,
}

impl TradeService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<dyn PortfolioLedger>,
        history: Arc<dyn HistoryRecorder>,
        settlement: Arc<dyn SettlementPort>,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn TimeProvider>,
        config: TradeConfig,
    ) -> Self {
        Self {
            orders,
            ledger,
            history,
            settlement,
            oracle,
            clock,
            config,
        }
    }

    /// # Summary
    /// 解析当前单价。
    ///
    /// # Returns
    /// 股票不存在时返回 `PriceResolutionFailed`，其余错误原样透传。
    async fn resolve_price(&self, stock_id: StockId) -> Result<Decimal, TradeError> {
        match self.oracle.unit_price(stock_id).await {
            Ok(price) if price > Decimal::ZERO => Ok(price),
            Ok(price) => {
                warn!("Stock {} has non-positive price {}", stock_id, price);
                Err(TradeError::PriceResolutionFailed(stock_id))
            }
            Err(TradeError::StockNotFound(id)) => Err(TradeError::PriceResolutionFailed(id)),
            Err(e) => Err(e),
        }
    }

    /// # Summary
    /// 以执行时单价结算订单，冲突时按配置重试。
    ///
    /// # Logic
    /// 每次尝试都重新取价，保证最终写入的是提交时刻的单价。
    async fn settle_with_retry(&self, order: &Order) -> Result<ExecutionReport, TradeError> {
        let max_attempts = self.config.max_settle_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            let unit_price = self.resolve_price(order.stock_id).await?;
            match self.settlement.settle(&order.settlement(unit_price)).await {
                Ok(SettlementOutcome::Completed { order, position, .. }) => {
                    info!(
                        "Order {} completed: {} {} x {} = {}, position {}",
                        order.id, order.order_type, order.quantity, unit_price, order.price, position
                    );
                    return Ok(ExecutionReport::from(&order));
                }
                Ok(SettlementOutcome::AlreadyTerminal(order)) => {
                    debug!("Order {} already {}", order.id, order.status);
                    return Ok(ExecutionReport::from(&order));
                }
                Err(TradeError::ConcurrentModification(msg)) if attempt < max_attempts => {
                    debug!(attempt, "Order {} settlement conflicted: {}", order.id, msg);
                    tokio::time::sleep(self.config.retry_backoff().saturating_mul(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// # Summary
    /// 执行失败后把订单迁移到 `FAILED`，迁移本身失败只记录日志。
    ///
    /// # Returns
    /// 订单已被另一执行方结算为 `COMPLETED` 时返回其回执，本次失败不再上报。
    async fn fail(&self, order_id: OrderId, cause: &TradeError) -> Option<ExecutionReport> {
        let reason = cause.to_string();
        match self.orders.mark_failed(order_id, &reason).await {
            Ok(true) => {
                warn!("Order {} failed: {}", order_id, reason);
                None
            }
            Ok(false) => {
                debug!("Order {} was already terminal when marking failed", order_id);
                match self.orders.get_order(order_id).await {
                    Ok(Some(order)) if order.status == OrderStatus::Completed => {
                        Some(ExecutionReport::from(&order))
                    }
                    _ => None,
                }
            }
            Err(e) => {
                error!("Order {} could not be marked FAILED ({}): {}", order_id, reason, e);
                None
            }
        }
    }

    /// # Summary
    /// 回收滞留的 `PENDING` 订单。
    ///
    /// # Logic
    /// 1. 取出创建时间早于 `now - older_than` 的 `PENDING` 订单。
    /// 2. 以有限并发逐一执行，每笔订单都有独立的截止时长。
    ///
    /// # Returns
    /// 回收统计；单笔执行失败不会中断整体回收。
    pub async fn recover_pending(&self, older_than: chrono::Duration) -> Result<RecoveryReport, TradeError> {
        let cutoff = self.clock.now() - older_than;
        let stranded = self.orders.list_pending(cutoff).await?;
        if stranded.is_empty() {
            return Ok(RecoveryReport::default());
        }
        info!("Recovering {} stranded pending orders", stranded.len());

        let deadline = self.config.execution_timeout();
        let ids: Vec<OrderId> = stranded.iter().map(|order| order.id).collect();
        let mut report = RecoveryReport {
            scanned: ids.len(),
            ..Default::default()
        };
        let results: Vec<Result<ExecutionReport, TradeError>> = stream::iter(ids)
            .map(|id| self.execute_order_within(id, deadline))
            .buffer_unordered(RECOVERY_CONCURRENCY)
            .collect()
            .await;

        for result in results {
            match result {
                Ok(r) if r.status == OrderStatus::Completed => report.completed += 1,
                Ok(_) => report.failed += 1,
                Err(TradeError::Timeout(id)) => warn!("Recovery of order {} timed out", id),
                Err(_) => report.failed += 1,
            }
        }

        info!(
            "Recovery finished: {} scanned, {} completed, {} failed",
            report.scanned, report.completed, report.failed
        );
        Ok(report)
    }
}

#[async_trait]
impl TradePort for TradeService {
    /// # Logic
    /// 1. 校验数量为正 (在任何写操作之前)。
    /// 2. 通过价格源取得单价，算出报价 `单价 * 数量` (溢出视为参数非法)。
    /// 3. 以 `PENDING` 落库。
    async fn place_order(&self, order: NewOrder) -> Result<OrderId, TradeError> {
        order.validate()?;
        let unit_price = self.resolve_price(order.stock_id).await?;
        let quote = order.quote(unit_price)?;
        let placed = self.orders.insert_order(&order, quote).await?;
        Ok(placed.id)
    }

    /// # Logic
    /// 1. 读取订单；已处于终态则直接返回，不产生任何副作用。
    /// 2. 重新取价并在单个事务内结算。
    /// 3. 任何错误都把订单迁移到 `FAILED` 并把错误返回给调用方。
    async fn execute_order(&self, order_id: OrderId) -> Result<ExecutionReport, TradeError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(TradeError::OrderNotFound(order_id))?;

        if order.status.is_terminal() {
            return Ok(ExecutionReport::from(&order));
        }

        match self.settle_with_retry(&order).await {
            Ok(report) => Ok(report),
            Err(e) => match self.fail(order_id, &e).await {
                Some(report) => Ok(report),
                None => Err(e),
            },
        }
    }

    /// # Logic
    /// 截止时长到期时丢弃正在进行的执行；未提交的事务随之回滚，订单保持 `PENDING`。
    async fn execute_order_within(
        &self,
        order_id: OrderId,
        deadline: Duration,
    ) -> Result<ExecutionReport, TradeError> {
        match tokio::time::timeout(deadline, self.execute_order(order_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Order {} execution exceeded {:?}, left pending", order_id, deadline);
                Err(TradeError::Timeout(order_id))
            }
        }
    }

    /// # Logic
    /// 下单阶段的错误原样返回；下单之后的执行错误包装为 `ExecutionFailed`，
    /// 携带订单 ID。截止时间到期返回的 `Timeout` 本身已带订单 ID。
    async fn place_and_execute(
        &self,
        user_id: UserId,
        stock_id: StockId,
        order_type: OrderType,
        quantity: Decimal,
    ) -> Result<ExecutionReport, TradeError> {
        let order_id = self
            .place_order(NewOrder::new(user_id, stock_id, order_type, quantity))
            .await?;
        match self
            .execute_order_within(order_id, self.config.execution_timeout())
            .await
        {
            Err(e) if e.order_id().is_none() => Err(TradeError::ExecutionFailed {
                order_id,
                source: Box::new(e),
            }),
            other => other,
        }
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, TradeError> {
        self.orders.get_order(order_id).await
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, TradeError> {
        self.orders.list_orders(user_id).await
    }

    async fn get_position(
        &self,
        user_id: UserId,
        stock_id: StockId,
    ) -> Result<Option<Portfolio>, TradeError> {
        self.ledger.get_position(user_id, stock_id).await
    }

    async fn list_positions(&self, user_id: UserId) -> Result<Vec<Portfolio>, TradeError> {
        self.ledger.list_positions(user_id).await
    }

    async fn list_history(
        &self,
        user_id: UserId,
        page: HistoryPage,
    ) -> Result<Vec<History>, TradeError> {
        self.history.list_history(user_id, page).await
    }
}
