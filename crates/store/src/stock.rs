use crate::database::Database;
use crate::error::{parse_decimal, store_err, trade_err};
use async_trait::async_trait;
use bourse_core::common::StockId;
use bourse_core::stock::entity::{NewStock, Stock};
use bourse_core::stock::port::{PriceOracle, StockStore};
use bourse_core::store::error::StoreError;
use bourse_core::trade::error::TradeError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

type StockRow = (i64, String, String, String, DateTime<Utc>);

fn stock_from_row(r: StockRow) -> Result<Stock, StoreError> {
    Ok(Stock {
        id: StockId(r.0),
        symbol: r.1,
        name: r.2,
        price: parse_decimal(&r.3)?,
        updated_at: r.4,
    })
}

/// # Summary
/// `StockStore` 与 `PriceOracle` 的 SQLite 实现。
///
/// # Invariants
/// * 每次调用都直接查询 `stocks` 表，不做任何缓存，因此可以安全地作为订单定价的价格源。
pub struct SqliteStockStore {
    db: Database,
}

impl SqliteStockStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StockStore for SqliteStockStore {
    async fn create_stock(&self, stock: &NewStock) -> Result<Stock, StoreError> {
        let now = self.db.now();
        let id = sqlx::query("INSERT INTO stocks (symbol, name, price, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&stock.symbol)
            .bind(&stock.name)
            .bind(stock.price.to_string())
            .bind(now)
            .execute(self.db.pool())
            .await
            .map_err(store_err)?
            .last_insert_rowid();

        info!("Stock {} created with id {}", stock.symbol, id);
        Ok(Stock {
            id: StockId(id),
            symbol: stock.symbol.clone(),
            name: stock.name.clone(),
            price: stock.price,
            updated_at: now,
        })
    }

    async fn get_stock(&self, id: StockId) -> Result<Option<Stock>, StoreError> {
        sqlx::query_as::<_, StockRow>(
            "SELECT id, symbol, name, price, updated_at FROM stocks WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(self.db.pool())
        .await
        .map_err(store_err)?
        .map(stock_from_row)
        .transpose()
    }

    async fn list_stocks(&self) -> Result<Vec<Stock>, StoreError> {
        sqlx::query_as::<_, StockRow>(
            "SELECT id, symbol, name, price, updated_at FROM stocks ORDER BY id DESC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(store_err)?
        .into_iter()
        .map(stock_from_row)
        .collect()
    }

    async fn update_price(&self, id: StockId, price: Decimal) -> Result<Stock, StoreError> {
        let updated = sqlx::query("UPDATE stocks SET price = ?, updated_at = ? WHERE id = ?")
            .bind(price.to_string())
            .bind(self.db.now())
            .bind(id.0)
            .execute(self.db.pool())
            .await
            .map_err(store_err)?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound(format!("stock {}", id)));
        }

        self.get_stock(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("stock {}", id)))
    }

    async fn delete_stock(&self, id: StockId) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM stocks WHERE id = ?")
            .bind(id.0)
            .execute(self.db.pool())
            .await
            .map_err(store_err)?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("stock {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl PriceOracle for SqliteStockStore {
    async fn unit_price(&self, stock_id: StockId) -> Result<Decimal, TradeError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT price FROM stocks WHERE id = ?")
            .bind(stock_id.0)
            .fetch_optional(self.db.pool())
            .await
            .map_err(trade_err)?;

        match raw {
            Some(p) => Ok(parse_decimal(&p)?),
            None => Err(TradeError::StockNotFound(stock_id)),
        }
    }
}
