use async_trait::async_trait;
use bourse_core::common::time::{FakeClockProvider, RealTimeProvider, TimeProvider};
use bourse_core::common::{OrderId, StockId, UserId};
use bourse_core::config::{DatabaseConfig, TradeConfig};
use bourse_core::stock::entity::NewStock;
use bourse_core::stock::port::{PriceOracle, StockStore};
use bourse_core::store::error::StoreError;
use bourse_core::store::port::{NewUser, Role, UserStore};
use bourse_core::trade::entity::{
    HistoryAction, HistoryPage, NewOrder, OrderStatus, OrderType, Settlement, SettlementOutcome,
};
use bourse_core::trade::error::TradeError;
use bourse_core::trade::port::{SettlementPort, TradePort};
use bourse_store::account::SqliteAccountStore;
use bourse_store::database::Database;
use bourse_store::history::SqliteHistoryRecorder;
use bourse_store::order::SqliteOrderStore;
use bourse_store::portfolio::SqlitePortfolioLedger;
use bourse_store::settlement::SqliteSettlementStore;
use bourse_store::stock::SqliteStockStore;
use bourse_trade::account::AccountService;
use bourse_trade::service::TradeService;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// 可以临时变慢或丢失报价的价格源
struct SwitchableOracle {
    inner: Arc<SqliteStockStore>,
    slow: AtomicBool,
    missing: AtomicBool,
}

#[async_trait]
impl PriceOracle for SwitchableOracle {
    async fn unit_price(&self, stock_id: StockId) -> Result<Decimal, TradeError> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(TradeError::StockNotFound(stock_id));
        }
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.inner.unit_price(stock_id).await
    }
}

/// 每次结算都报告并发冲突
#[derive(Default)]
struct ConflictingSettlement {
    calls: AtomicU32,
}

#[async_trait]
impl SettlementPort for ConflictingSettlement {
    async fn settle(&self, settlement: &Settlement) -> Result<SettlementOutcome, TradeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TradeError::ConcurrentModification(format!(
            "order {} kept moving",
            settlement.order_id
        )))
    }
}

struct Harness {
    _dir: TempDir,
    db: Database,
    stocks: Arc<SqliteStockStore>,
    oracle: Arc<SwitchableOracle>,
    service: Arc<TradeService>,
    user: UserId,
    stock: StockId,
}

async fn harness_with(clock: Arc<dyn TimeProvider>) -> anyhow::Result<Harness> {
    let dir = tempdir()?;
    let config = DatabaseConfig {
        data_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };
    let db = Database::open(&config, clock.clone()).await?;

    let stocks = Arc::new(SqliteStockStore::new(db.clone()));
    let oracle = Arc::new(SwitchableOracle {
        inner: stocks.clone(),
        slow: AtomicBool::new(false),
        missing: AtomicBool::new(false),
    });
    let service = Arc::new(TradeService::new(
        Arc::new(SqliteOrderStore::new(db.clone())),
        Arc::new(SqlitePortfolioLedger::new(db.clone())),
        Arc::new(SqliteHistoryRecorder::new(db.clone())),
        Arc::new(SqliteSettlementStore::new(db.clone())),
        oracle.clone(),
        clock,
        TradeConfig::default(),
    ));

    let user = SqliteAccountStore::new(db.clone())
        .create_user(&NewUser {
            email: "trader@example.com".to_string(),
            role: Role::Trader,
        })
        .await?;
    let stock = stocks
        .create_stock(&NewStock {
            symbol: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
            price: dec!(50.0),
        })
        .await?;

    Ok(Harness {
        _dir: dir,
        db,
        stocks,
        oracle,
        service,
        user: user.id,
        stock: stock.id,
    })
}

async fn harness() -> anyhow::Result<Harness> {
    harness_with(Arc::new(RealTimeProvider)).await
}

/// 由 BUY/SELL 流水推算的带符号持仓 (单价固定为 50)
async fn signed_history_sum(h: &Harness) -> anyhow::Result<Decimal> {
    let history = h
        .service
        .list_history(h.user, HistoryPage::first(1_000))
        .await?;
    Ok(history
        .iter()
        .map(|e| match e.action {
            HistoryAction::Buy => e.amount / dec!(50.0),
            HistoryAction::Sell => -(e.amount / dec!(50.0)),
            _ => Decimal::ZERO,
        })
        .sum())
}

async fn held(h: &Harness) -> anyhow::Result<Decimal> {
    Ok(h
        .service
        .get_position(h.user, h.stock)
        .await?
        .map(|p| p.quantity)
        .unwrap_or(Decimal::ZERO))
}

async fn status_of(h: &Harness, id: OrderId) -> anyhow::Result<Option<OrderStatus>> {
    Ok(h.service.get_order(id).await?.map(|o| o.status))
}

#[tokio::test]
async fn test_buy_records_price_position_and_history() -> anyhow::Result<()> {
    let h = harness().await?;

    let report = h
        .service
        .place_and_execute(h.user, h.stock, OrderType::Buy, dec!(2))
        .await?;
    assert_eq!(report.status, OrderStatus::Completed);
    assert_eq!(report.price, dec!(100.0));
    assert!(report.failure_reason.is_none());

    assert_eq!(held(&h).await?, dec!(2));
    let history = h.service.list_history(h.user, HistoryPage::default()).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoryAction::Buy);
    assert_eq!(history[0].amount, dec!(100.0));
    assert_eq!(history[0].order_id, Some(report.order_id));
    Ok(())
}

#[tokio::test]
async fn test_oversized_sell_fails_without_side_effects() -> anyhow::Result<()> {
    let h = harness().await?;
    h.service
        .place_and_execute(h.user, h.stock, OrderType::Buy, dec!(3))
        .await?;

    let err = h
        .service
        .place_and_execute(h.user, h.stock, OrderType::Sell, dec!(4))
        .await
        .expect_err("cannot sell more than held");
    assert!(matches!(err, TradeError::ExecutionFailed { .. }));
    assert!(matches!(err.cause(), TradeError::InsufficientHoldings { held, requested } if *held == dec!(3) && *requested == dec!(4)));

    assert_eq!(held(&h).await?, dec!(3));
    let orders = h.service.list_orders(h.user).await?;
    assert_eq!(orders.len(), 2);
    // 最新在前
    assert_eq!(err.order_id(), Some(orders[0].id));
    assert_eq!(orders[0].status, OrderStatus::Failed);
    assert!(orders[0].failure_reason.as_deref().is_some_and(|r| !r.is_empty()));
    assert_eq!(h.service.list_history(h.user, HistoryPage::default()).await?.len(), 1);

    // 失败订单再次执行得到同一个终态与原因
    let replay = h.service.execute_order(orders[0].id).await?;
    assert_eq!(replay.status, OrderStatus::Failed);
    assert_eq!(replay.failure_reason, orders[0].failure_reason);
    Ok(())
}

#[tokio::test]
async fn test_execute_is_idempotent_on_terminal_orders() -> anyhow::Result<()> {
    let h = harness().await?;
    let id = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, dec!(5)))
        .await?;

    let first = h.service.execute_order(id).await?;
    // 改价后再次执行，不能重新定价也不能重复记账
    h.stocks.update_price(h.stock, dec!(70)).await?;
    let second = h.service.execute_order(id).await?;

    assert_eq!(first, second);
    assert_eq!(second.price, dec!(250.0));
    assert_eq!(held(&h).await?, dec!(5));
    assert_eq!(h.service.list_history(h.user, HistoryPage::default()).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_execution_price_overrides_quote() -> anyhow::Result<()> {
    let h = harness().await?;
    let id = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, dec!(2)))
        .await?;
    let quoted = h.service.get_order(id).await?.expect("order exists");
    assert_eq!(quoted.status, OrderStatus::Pending);
    assert_eq!(quoted.price, dec!(100.0));

    h.stocks.update_price(h.stock, dec!(60)).await?;
    let report = h.service.execute_order(id).await?;
    assert_eq!(report.price, dec!(120));
    Ok(())
}

#[tokio::test]
async fn test_rejections_before_any_write() -> anyhow::Result<()> {
    let h = harness().await?;

    assert!(matches!(
        h.service.place_and_execute(h.user, h.stock, OrderType::Buy, dec!(0)).await,
        Err(TradeError::InvalidInput(_))
    ));
    assert!(matches!(
        h.service.place_and_execute(h.user, h.stock, OrderType::Sell, dec!(-1)).await,
        Err(TradeError::InvalidInput(_))
    ));
    assert!(matches!(
        h.service.place_and_execute(h.user, StockId(404), OrderType::Buy, dec!(1)).await,
        Err(TradeError::PriceResolutionFailed(StockId(404)))
    ));
    assert!(matches!(
        h.service.place_and_execute(UserId(404), h.stock, OrderType::Buy, dec!(1)).await,
        Err(TradeError::UserNotFound(UserId(404)))
    ));
    assert!(matches!(
        h.service.execute_order(OrderId(404)).await,
        Err(TradeError::OrderNotFound(OrderId(404)))
    ));
    // 报价超出 Decimal 表示范围
    let err = h
        .service
        .place_and_execute(h.user, h.stock, OrderType::Buy, Decimal::MAX / dec!(10))
        .await
        .expect_err("quote overflows");
    assert!(matches!(err, TradeError::InvalidInput(_)));
    assert_eq!(err.order_id(), None);

    assert!(h.service.list_orders(h.user).await?.is_empty());
    assert!(h.service.list_positions(h.user).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_price_lost_before_execution_fails_order() -> anyhow::Result<()> {
    let h = harness().await?;
    let id = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, dec!(1)))
        .await?;

    h.oracle.missing.store(true, Ordering::SeqCst);
    let err = h.service.execute_order(id).await.expect_err("no price");
    assert!(matches!(err, TradeError::PriceResolutionFailed(s) if s == h.stock));

    let order = h.service.get_order(id).await?.expect("order exists");
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(h.service.list_positions(h.user).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buys_on_empty_key() -> anyhow::Result<()> {
    let h = harness().await?;

    let (a, b) = tokio::join!(
        h.service.place_and_execute(h.user, h.stock, OrderType::Buy, dec!(5)),
        h.service.place_and_execute(h.user, h.stock, OrderType::Buy, dec!(3)),
    );
    assert_eq!(a?.status, OrderStatus::Completed);
    assert_eq!(b?.status, OrderStatus::Completed);

    assert_eq!(held(&h).await?, dec!(8));
    assert_eq!(h.service.list_history(h.user, HistoryPage::default()).await?.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sells_never_oversell() -> anyhow::Result<()> {
    let h = harness().await?;
    h.service
        .place_and_execute(h.user, h.stock, OrderType::Buy, dec!(10))
        .await?;

    let s1 = h.service.clone();
    let s2 = h.service.clone();
    let (user, stock) = (h.user, h.stock);
    let big = tokio::spawn(async move { s1.place_and_execute(user, stock, OrderType::Sell, dec!(10)).await });
    let small = tokio::spawn(async move { s2.place_and_execute(user, stock, OrderType::Sell, dec!(1)).await });
    let results = [big.await?, small.await?];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| {
            r.as_ref()
                .is_err_and(|e| matches!(e.cause(), TradeError::InsufficientHoldings { .. }))
        })
        .count();
    assert_eq!(ok, 1);
    assert_eq!(rejected, 1);

    let remaining = held(&h).await?;
    assert!(remaining == dec!(0) || remaining == dec!(9));
    assert_eq!(signed_history_sum(&h).await?, remaining);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_position_matches_signed_history_under_contention() -> anyhow::Result<()> {
    let h = harness().await?;
    h.service
        .place_and_execute(h.user, h.stock, OrderType::Buy, dec!(4))
        .await?;

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = h.service.clone();
        let (user, stock) = (h.user, h.stock);
        let (order_type, qty) = if i % 2 == 0 {
            (OrderType::Buy, dec!(3))
        } else {
            (OrderType::Sell, dec!(5))
        };
        handles.push(tokio::spawn(async move {
            service.place_and_execute(user, stock, order_type, qty).await
        }));
    }
    for handle in handles {
        match handle.await? {
            Ok(_) => {}
            Err(e) if matches!(e.cause(), TradeError::InsufficientHoldings { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let quantity = held(&h).await?;
    assert!(quantity >= Decimal::ZERO);
    assert_eq!(signed_history_sum(&h).await?, quantity);

    // 每张订单都已到达终态
    let orders = h.service.list_orders(h.user).await?;
    assert_eq!(orders.len(), 17);
    assert!(orders.iter().all(|o| o.status.is_terminal()));
    Ok(())
}

#[tokio::test]
async fn test_deadline_leaves_order_pending_and_resumable() -> anyhow::Result<()> {
    let h = harness().await?;
    let id = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, dec!(1)))
        .await?;

    h.oracle.slow.store(true, Ordering::SeqCst);
    let err = h
        .service
        .execute_order_within(id, Duration::from_millis(30))
        .await
        .expect_err("deadline expires");
    assert!(matches!(err, TradeError::Timeout(t) if t == id));
    assert!(err.is_retryable());

    let order = h.service.get_order(id).await?.expect("order exists");
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(h.service.list_positions(h.user).await?.is_empty());

    h.oracle.slow.store(false, Ordering::SeqCst);
    let report = h.service.execute_order(id).await?;
    assert_eq!(report.status, OrderStatus::Completed);
    assert_eq!(held(&h).await?, dec!(1));
    Ok(())
}

#[tokio::test]
async fn test_recover_pending_settles_stranded_orders() -> anyhow::Result<()> {
    let clock = Arc::new(FakeClockProvider::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 14, 0, 0).unwrap(),
    ));
    let h = harness_with(clock.clone()).await?;

    let buy = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, dec!(2)))
        .await?;
    let sell = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Sell, dec!(7)))
        .await?;
    clock.advance(chrono::Duration::seconds(60));
    let fresh = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, dec!(1)))
        .await?;

    let service = h.service.clone();
    let report = tokio::spawn(async move {
        service.recover_pending(chrono::Duration::seconds(30)).await
    })
    .await??;
    assert_eq!(report.scanned, 2);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(status_of(&h, buy).await?, Some(OrderStatus::Completed));
    assert_eq!(status_of(&h, sell).await?, Some(OrderStatus::Failed));
    assert_eq!(status_of(&h, fresh).await?, Some(OrderStatus::Pending));
    assert_eq!(held(&h).await?, dec!(2));

    // 再次回收没有可处理的订单
    let again = h
        .service
        .recover_pending(chrono::Duration::seconds(30))
        .await?;
    assert_eq!(again.scanned, 0);
    Ok(())
}

#[tokio::test]
async fn test_execution_overflow_fails_order_and_recovery_continues() -> anyhow::Result<()> {
    let clock = Arc::new(FakeClockProvider::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 14, 0, 0).unwrap(),
    ));
    let h = harness_with(clock.clone()).await?;
    let huge = Decimal::MAX / dec!(100);

    let direct = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, huge))
        .await?;
    let stranded = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, huge))
        .await?;
    // 报价按 50 计算成立，按执行时的 500 计算溢出
    h.stocks.update_price(h.stock, dec!(500)).await?;

    let err = h.service.execute_order(direct).await.expect_err("amount overflows");
    assert!(matches!(err, TradeError::InvalidInput(_)));
    assert_eq!(status_of(&h, direct).await?, Some(OrderStatus::Failed));

    clock.advance(chrono::Duration::seconds(60));
    let report = h
        .service
        .recover_pending(chrono::Duration::seconds(30))
        .await?;
    assert_eq!(report.scanned, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(status_of(&h, stranded).await?, Some(OrderStatus::Failed));

    assert!(h.service.list_positions(h.user).await?.is_empty());
    assert!(h.service.list_history(h.user, HistoryPage::default()).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_of_one_order_settle_once() -> anyhow::Result<()> {
    let h = harness().await?;
    let id = h
        .service
        .place_order(NewOrder::new(h.user, h.stock, OrderType::Buy, dec!(2)))
        .await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move { service.execute_order(id).await }));
    }
    for handle in handles {
        let report = handle.await??;
        assert_eq!(report.status, OrderStatus::Completed);
        assert_eq!(report.price, dec!(100.0));
    }

    assert_eq!(held(&h).await?, dec!(2));
    assert_eq!(h.service.list_history(h.user, HistoryPage::default()).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_settlement_conflicts_exhaust_into_failed() -> anyhow::Result<()> {
    let h = harness().await?;
    let settlement = Arc::new(ConflictingSettlement::default());
    let config = TradeConfig {
        max_settle_attempts: 3,
        retry_backoff_ms: 1,
        ..Default::default()
    };
    let service = TradeService::new(
        Arc::new(SqliteOrderStore::new(h.db.clone())),
        Arc::new(SqlitePortfolioLedger::new(h.db.clone())),
        Arc::new(SqliteHistoryRecorder::new(h.db.clone())),
        settlement.clone(),
        h.oracle.clone(),
        Arc::new(RealTimeProvider),
        config,
    );

    let err = service
        .place_and_execute(h.user, h.stock, OrderType::Buy, dec!(1))
        .await
        .expect_err("every attempt conflicts");
    assert!(matches!(err.cause(), TradeError::ConcurrentModification(_)));
    assert_eq!(settlement.calls.load(Ordering::SeqCst), 3);

    let id = err.order_id().expect("order was placed");
    let order = service.get_order(id).await?.expect("order exists");
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(order.failure_reason.is_some());
    assert!(service.list_positions(h.user).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_account_service_validation_and_flow() -> anyhow::Result<()> {
    let h = harness().await?;
    let store = Arc::new(SqliteAccountStore::new(h.db.clone()));
    let accounts = AccountService::new(store.clone(), store);

    assert!(matches!(
        accounts.create_user("not-an-email", Role::Trader).await,
        Err(StoreError::InvalidInput(_))
    ));
    let admin = accounts.create_user(" Admin@Example.com ", Role::Admin).await?;
    assert_eq!(admin.email, "admin@example.com");
    assert!(matches!(
        accounts.create_user("admin@example.com", Role::Trader).await,
        Err(StoreError::Conflict(_))
    ));

    assert!(matches!(
        accounts.deposit(h.user, dec!(0)).await,
        Err(TradeError::InvalidInput(_))
    ));
    assert!(matches!(
        accounts.withdraw(h.user, dec!(-5)).await,
        Err(TradeError::InvalidInput(_))
    ));
    assert!(matches!(
        accounts.set_balance(h.user, dec!(-5)).await,
        Err(TradeError::InvalidInput(_))
    ));

    assert_eq!(accounts.deposit(h.user, dec!(500)).await?, dec!(500));
    assert!(matches!(
        accounts.withdraw(h.user, dec!(501)).await,
        Err(TradeError::InsufficientFunds { .. })
    ));
    assert_eq!(accounts.withdraw(h.user, dec!(200)).await?, dec!(300));
    assert_eq!(accounts.set_balance(h.user, dec!(0)).await?, dec!(0));
    assert_eq!(accounts.balance(h.user).await?, dec!(0));

    let actions: Vec<_> = h
        .service
        .list_history(h.user, HistoryPage::default())
        .await?
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![HistoryAction::BalanceUpdate, HistoryAction::Withdraw, HistoryAction::Deposit]
    );
    assert_eq!(accounts.list_users().await?.len(), 2);
    assert!(accounts.get_user(admin.id).await?.is_some());
    Ok(())
}
