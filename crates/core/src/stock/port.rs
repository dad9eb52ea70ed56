use super::entity::{NewStock, Stock};
use crate::common::StockId;
use crate::store::error::StoreError;
use crate::trade::error::TradeError;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// # Summary
/// 股票元数据的持久化接口，供管理端维护标的与价格。
///
/// # Invariants
/// - 实现者必须直接读写权威存储，不得在内部缓存结果。
#[async_trait]
pub trait StockStore: Send + Sync {
    /// # Summary
    /// 新建一只股票。
    ///
    /// # Returns
    /// 返回带有存储层分配 ID 的完整实体；`symbol` 重复时返回 `StoreError::Conflict`。
    async fn create_stock(&self, stock: &NewStock) -> Result<Stock, StoreError>;

    /// # Summary
    /// 根据 ID 获取股票。不存在返回 `None`。
    async fn get_stock(&self, id: StockId) -> Result<Option<Stock>, StoreError>;

    /// # Summary
    /// 列出全部股票，按 ID 倒序。
    async fn list_stocks(&self) -> Result<Vec<Stock>, StoreError>;

    /// # Summary
    /// 更新股票单价并刷新 `updated_at`。
    ///
    /// # Returns
    /// 更新后的实体；股票不存在时返回 `StoreError::NotFound`。
    async fn update_price(&self, id: StockId, price: Decimal) -> Result<Stock, StoreError>;

    /// # Summary
    /// 删除股票。仍被订单或持仓引用时返回 `StoreError::Conflict`。
    async fn delete_stock(&self, id: StockId) -> Result<(), StoreError>;
}

/// # Summary
/// 价格预言机：把股票 ID 解析为当前单价。
///
/// # Invariants
/// - 订单定价与结算只能通过本接口取价，并且必须读取权威存储的即时值，
///   任何列表缓存都不得出现在这条路径上。
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// # Summary
    /// 获取当前单价。
    ///
    /// # Returns
    /// * `Ok(Decimal)` - 当前单价
    /// * `Err(TradeError::StockNotFound)` - 股票不存在
    async fn unit_price(&self, stock_id: StockId) -> Result<Decimal, TradeError>;
}
