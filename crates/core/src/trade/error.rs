use crate::common::{OrderId, StockId, UserId};
use crate::store::error::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// # Summary
/// 交易执行环节中可能发生的错误。
///
/// # Invariants
/// - 校验类错误 (`InvalidInput`) 一定发生在任何写操作之前。
/// - `NegativeHoldings` 是账本的内部守卫，正常路径下卖出会先被 `InsufficientHoldings` 拦截。
/// - 只有 `ConcurrentModification` 与 `Timeout` 属于可重试错误。
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("参数非法: {0}")]
    InvalidInput(String),
    #[error("股票不存在: {0}")]
    StockNotFound(StockId),
    #[error("订单不存在: {0}")]
    OrderNotFound(OrderId),
    #[error("用户不存在: {0}")]
    UserNotFound(UserId),
    #[error("无法解析股票 {0} 的当前价格")]
    PriceResolutionFailed(StockId),
    #[error("可卖持仓不足. 持有: {held}, 卖出: {requested}")]
    InsufficientHoldings { held: Decimal, requested: Decimal },
    #[error("持仓不能为负. 当前: {current}, 变动: {delta}")]
    NegativeHoldings { current: Decimal, delta: Decimal },
    #[error("可用资金不足. 需要: {required}, 实际: {actual}")]
    InsufficientFunds { required: Decimal, actual: Decimal },
    #[error("持久化失败: {0}")]
    PersistenceFailure(String),
    #[error("并发修改冲突: {0}")]
    ConcurrentModification(String),
    #[error("执行超时, 订单 {0} 保持 PENDING 可重试")]
    Timeout(OrderId),
    /// 订单已落库但执行失败，`source` 为具体原因；除非迁移本身失败，订单已进入 `FAILED`
    #[error("订单 {order_id} 执行失败: {source}")]
    ExecutionFailed {
        order_id: OrderId,
        source: Box<TradeError>,
    },
}

impl TradeError {
    /// 是否可以在不改变输入的前提下原样重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradeError::ConcurrentModification(_) | TradeError::Timeout(_)
        )
    }

    /// 错误关联的已落库订单，下单前被拒绝的错误没有订单
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            TradeError::Timeout(id) => Some(*id),
            TradeError::ExecutionFailed { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }

    /// 剥掉 `ExecutionFailed` 包装后的具体原因
    pub fn cause(&self) -> &TradeError {
        match self {
            TradeError::ExecutionFailed { source, .. } => source.cause(),
            other => other,
        }
    }
}

impl From<StoreError> for TradeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidInput(msg) => TradeError::InvalidInput(msg),
            other => TradeError::PersistenceFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TradeError::ConcurrentModification("v1".into()).is_retryable());
        assert!(TradeError::Timeout(OrderId(1)).is_retryable());
        assert!(!TradeError::PersistenceFailure("disk".into()).is_retryable());
        assert!(!TradeError::StockNotFound(StockId(7)).is_retryable());
    }

    #[test]
    fn test_execution_failure_keeps_order_and_cause() {
        let err = TradeError::ExecutionFailed {
            order_id: OrderId(9),
            source: Box::new(TradeError::InsufficientHoldings {
                held: Decimal::ONE,
                requested: Decimal::TWO,
            }),
        };
        assert_eq!(err.order_id(), Some(OrderId(9)));
        assert!(matches!(err.cause(), TradeError::InsufficientHoldings { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains('9'));

        assert_eq!(TradeError::Timeout(OrderId(3)).order_id(), Some(OrderId(3)));
        assert_eq!(TradeError::StockNotFound(StockId(1)).order_id(), None);
    }

    #[test]
    fn test_store_error_conversion() {
        let err: TradeError = StoreError::InvalidInput("price".into()).into();
        assert!(matches!(err, TradeError::InvalidInput(_)));

        let err: TradeError = StoreError::Database("locked".into()).into();
        assert!(matches!(err, TradeError::PersistenceFailure(_)));
    }
}
