use std::sync::Arc;

use bourse_cache::mem::MemCache;
use bourse_core::common::time::{RealTimeProvider, TimeProvider};
use bourse_core::config::{AppConfig, LogConfig};
use bourse_market::catalog::StockCatalog;
use bourse_store::account::SqliteAccountStore;
use bourse_store::database::Database;
use bourse_store::history::SqliteHistoryRecorder;
use bourse_store::order::SqliteOrderStore;
use bourse_store::portfolio::SqlitePortfolioLedger;
use bourse_store::settlement::SqliteSettlementStore;
use bourse_store::stock::SqliteStockStore;
use bourse_trade::account::AccountService;
use bourse_trade::service::TradeService;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// 依次叠加默认值、可选的 `config.toml` 与 `BOURSE__SECTION__KEY` 环境变量
fn load_config() -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("BOURSE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<AppConfig>()
}

/// # Summary
/// 初始化日志：控制台输出 + 按天滚动的文件输出。
///
/// # Returns
/// 非阻塞写入器的守卫，必须在进程生命周期内持有，否则尾部日志会丢失。
fn init_tracing(log: &LogConfig) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(&log.dir, "bourse.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    guard
}

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 Arc<dyn Trait> 注入到各服务。
///
/// # Logic
/// 1. 加载配置并初始化日志。
/// 2. 打开账本数据库，实例化各存储适配器。
/// 3. 构造交易引擎、账户服务与股票目录。
/// 4. 回收上次退出时滞留的 `PENDING` 订单。
/// 5. 挂起等待外部信号退出。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let config = load_config()?;
    let _log_guard = init_tracing(&config.log);
    info!("Bourse ledger starting...");

    // 2. 基础设施层
    let clock: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);
    let db = Database::open(&config.database, clock.clone()).await?;
    let stock_store = Arc::new(SqliteStockStore::new(db.clone()));
    let account_store = Arc::new(SqliteAccountStore::new(db.clone()));

    // 3. 应用服务层
    let trade = TradeService::new(
        Arc::new(SqliteOrderStore::new(db.clone())),
        Arc::new(SqlitePortfolioLedger::new(db.clone())),
        Arc::new(SqliteHistoryRecorder::new(db.clone())),
        Arc::new(SqliteSettlementStore::new(db.clone())),
        stock_store.clone(),
        clock,
        config.trade.clone(),
    );
    let accounts = AccountService::new(account_store.clone(), account_store);
    let catalog = StockCatalog::new(
        stock_store,
        Arc::new(MemCache::new()),
        config.cache.stock_list_ttl(),
    );

    // 4. 启动回收
    let recovered = trade
        .recover_pending(chrono::Duration::seconds(config.trade.recover_older_than_secs))
        .await?;
    info!(
        "Start-up recovery: {} scanned, {} completed, {} failed",
        recovered.scanned, recovered.completed, recovered.failed
    );
    info!(
        "{} users registered, {} stocks listed. Waiting for signals...",
        accounts.list_users().await?.len(),
        catalog.list_stocks().await?.len()
    );

    // 5. 挂起主线程，等待外部退出信号
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    db.close().await;

    Ok(())
}
