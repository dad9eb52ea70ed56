use bourse_core::cache::port::{Cache, CacheExt};
use bourse_core::common::StockId;
use bourse_core::stock::entity::{NewStock, Stock};
use bourse_core::stock::port::StockStore;
use bourse_core::store::error::StoreError;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 股票列表的缓存键
const LIST_KEY: &str = "stocks:list";

/// # Summary
/// 股票目录服务。
///
/// # Invariants
/// - 写操作先落库，再使列表缓存失效；缓存失效失败只记录日志。
/// - 缓存故障不影响读取结果，只会退化为直接查库。
/// - `get_stock` 不经过缓存。
/// - 列表读取与写操作之间不加锁：回填可能写回失效之前读到的旧列表，
///   旧列表最长在一个 TTL 内可见。成交定价从不读取此缓存。
pub struct StockCatalog {
    store: Arc<dyn StockStore>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl StockCatalog {
    /// # Summary
    /// 创建目录服务。
    ///
    /// # Arguments
    /// * `store`: 股票元数据存储。
    /// * `cache`: 列表缓存。
    /// * `ttl`: 列表缓存的存活时长。
    pub fn new(store: Arc<dyn StockStore>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    fn validate_price(price: Decimal) -> Result<(), StoreError> {
        if price <= Decimal::ZERO {
            return Err(StoreError::InvalidInput(format!(
                "price must be positive, got {}",
                price
            )));
        }
        Ok(())
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.del(LIST_KEY).await {
            warn!("Failed to invalidate stock list cache: {}", e);
        }
    }

    /// # Summary
    /// 新建股票。
    ///
    /// # Logic
    /// 1. 去掉首尾空白后 `symbol` 不能为空，价格必须为正。
    /// 2. 写入存储并使列表缓存失效。
    pub async fn create_stock(
        &self,
        symbol: &str,
        name: &str,
        price: Decimal,
    ) -> Result<Stock, StoreError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(StoreError::InvalidInput("symbol must not be empty".to_string()));
        }
        Self::validate_price(price)?;

        let stock = self
            .store
            .create_stock(&NewStock {
                symbol: symbol.to_uppercase(),
                name: name.trim().to_string(),
                price,
            })
            .await?;
        self.invalidate().await;
        Ok(stock)
    }

    pub async fn get_stock(&self, id: StockId) -> Result<Option<Stock>, StoreError> {
        self.store.get_stock(id).await
    }

    /// # Summary
    /// 修改股票单价。新价格对之后的每一次定价与结算立即可见。
    pub async fn update_price(&self, id: StockId, price: Decimal) -> Result<Stock, StoreError> {
        Self::validate_price(price)?;
        let stock = self.store.update_price(id, price).await?;
        self.invalidate().await;
        info!("Stock {} ({}) repriced to {}", stock.symbol, id, price);
        Ok(stock)
    }

    pub async fn delete_stock(&self, id: StockId) -> Result<(), StoreError> {
        self.store.delete_stock(id).await?;
        self.invalidate().await;
        info!("Stock {} deleted", id);
        Ok(())
    }

    /// # Summary
    /// 列出全部股票 (读穿缓存)。
    ///
    /// # Logic
    /// 1. 命中缓存直接返回。
    /// 2. 未命中或缓存出错时查询存储，并尽力回填缓存。
    pub async fn list_stocks(&self) -> Result<Vec<Stock>, StoreError> {
        match self.cache.get::<Vec<Stock>>(LIST_KEY).await {
            Ok(Some(stocks)) => {
                debug!("Stock list served from cache ({} items)", stocks.len());
                return Ok(stocks);
            }
            Ok(None) => {}
            Err(e) => warn!("Stock list cache read failed, falling back to store: {}", e),
        }

        let stocks = self.store.list_stocks().await?;
        if let Err(e) = self.cache.set(LIST_KEY, &stocks, Some(self.ttl)).await {
            warn!("Failed to populate stock list cache: {}", e);
        }
        Ok(stocks)
    }
}
