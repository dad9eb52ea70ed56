use bourse_core::common::time::TimeProvider;
use bourse_core::config::DatabaseConfig;
use bourse_core::store::error::StoreError;
use bourse_core::trade::error::TradeError;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 存储层内部乐观锁冲突的最大尝试次数
const MAX_CONFLICT_ATTEMPTS: u32 = 16;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL,
    balance TEXT NOT NULL CHECK (CAST(balance AS REAL) >= 0),
    created_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS stocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    price TEXT NOT NULL,
    updated_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    stock_id INTEGER NOT NULL REFERENCES stocks(id),
    order_type TEXT NOT NULL CHECK (order_type IN ('BUY', 'SELL')),
    quantity TEXT NOT NULL,
    price TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'COMPLETED', 'FAILED')),
    failure_reason TEXT,
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_user ON orders (user_id, id);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status);

CREATE TABLE IF NOT EXISTS portfolios (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    stock_id INTEGER NOT NULL REFERENCES stocks(id),
    quantity TEXT NOT NULL CHECK (CAST(quantity AS REAL) >= 0),
    version INTEGER NOT NULL,
    updated_at DATETIME NOT NULL,
    UNIQUE (user_id, stock_id)
);

CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    order_id INTEGER REFERENCES orders(id),
    stock_id INTEGER REFERENCES stocks(id),
    action TEXT NOT NULL,
    details TEXT NOT NULL,
    amount TEXT NOT NULL,
    created_at DATETIME NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_user ON history (user_id, id);

CREATE TRIGGER IF NOT EXISTS history_no_update BEFORE UPDATE ON history
BEGIN
    SELECT RAISE(ABORT, 'history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS history_no_delete BEFORE DELETE ON history
BEGIN
    SELECT RAISE(ABORT, 'history is append-only');
END;
"#;

/// # Summary
/// 账本数据库句柄：SQLite 连接池与时钟。
///
/// # Invariants
/// * 表结构在句柄创建时初始化。
/// * 开启 WAL 与外键约束；写锁竞争由 `busy_timeout` 排队等待。
/// * 克隆成本很低，各端口适配器各自持有一份。
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    clock: Arc<dyn TimeProvider>,
}

impl Database {
    /// 按配置打开 (必要时创建) 账本数据库并初始化表结构。
    ///
    /// # Logic
    /// 1. 确保数据根目录存在。
    /// 2. 配置 SQLite 连接选项：自动建库、WAL、外键、写锁等待。
    /// 3. 连接并执行 DDL。
    pub async fn open(config: &DatabaseConfig, clock: Arc<dyn TimeProvider>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| StoreError::InitError(format!("Failed to create data dir: {}", e)))?;

        let db_path = config.db_path();
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.busy_timeout() + Duration::from_secs(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;

        info!("Ledger database ready at {}", db_path.display());
        Ok(Self { pool, clock })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// 关闭连接池，等待在途连接归还
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// # Summary
/// 在 `ConcurrentModification` 时重跑整个操作。
///
/// # Logic
/// 每次重试前按尝试次数线性退避；其它错误或超出次数时原样返回。
pub(crate) async fn retry_on_conflict<T, F, Fut>(what: &str, mut op: F) -> Result<T, TradeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TradeError>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Err(TradeError::ConcurrentModification(msg)) if attempt < MAX_CONFLICT_ATTEMPTS => {
                debug!(attempt, "{} conflicted, retrying: {}", what, msg);
                tokio::time::sleep(Duration::from_millis(2 * u64::from(attempt))).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
