//! Withdrawal, dual-investment and scheduler passes against the memory
//! store and a scripted exchange.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use cctrade::config::AppConfig;
use cctrade::coordination::{GracefulShutdown, ShutdownSignal};
use cctrade::domain::{
    DualInvestmentType, DualOrderStatus, DualProduct, DualStrategy, MarginType, Market, OrderSide,
    Position, PositionSide, WithdrawalRule,
};
use cctrade::error::EngineError;
use cctrade::persistence::Store;
use cctrade::services::scheduler::{
    DUAL_LOOP, FUTURES_LOOP, ORDER_LOOP, PRICE_LOOP, WITHDRAWAL_LOOP,
};
use cctrade::services::{
    DualInvestmentService, DualOutcome, PassReport, Scheduler, WithdrawalOutcome,
    WithdrawalService,
};

use common::*;

fn eth_rule() -> WithdrawalRule {
    WithdrawalRule {
        id: 0,
        user_id: USER,
        asset: "ETH".into(),
        address: "0xfeed".into(),
        network: Some("ETH".into()),
        amount: dec!(1),
        min_balance: dec!(0.5),
        trigger_price: Some(dec!(3000)),
        is_active: true,
        auto_withdraw: true,
    }
}

fn product(min_amount: rust_decimal::Decimal, yield_rate: rust_decimal::Decimal) -> DualProduct {
    DualProduct {
        product_id: "BTC-USDT-7D".into(),
        base_asset: "BTC".into(),
        quote_asset: "USDT".into(),
        min_amount,
        max_amount: dec!(10000),
        duration_days: 7,
        yield_rate,
        is_active: true,
    }
}

fn plan(kind: DualInvestmentType) -> DualStrategy {
    DualStrategy {
        id: 0,
        user_id: USER,
        product_id: "BTC-USDT-7D".into(),
        base_asset: "BTC".into(),
        quote_asset: "USDT".into(),
        investment_type: kind,
        amount: dec!(100),
        trigger_price: None,
        min_yield_rate: dec!(0.05),
        ladder_steps: 3,
        amount_per_step: dec!(50),
        is_active: true,
    }
}

fn scheduler(h: &Harness, symbols: &[&str]) -> Scheduler {
    let mut config = AppConfig::default();
    config.scheduler.price_symbols = symbols.iter().map(|s| s.to_string()).collect();
    Scheduler::new(
        &config,
        h.store.clone(),
        h.provider.clone(),
        h.tasks.clone(),
    )
}

#[tokio::test]
async fn withdrawal_waits_for_balance_and_price() {
    let h = Harness::new();
    let service = WithdrawalService::new(h.store.clone(), h.provider.clone());
    let rule = h.store.create_withdrawal_rule(eth_rule()).await.unwrap();

    h.exchange.set_balance("ETH", dec!(1.2));
    assert_eq!(
        service.evaluate(&rule).await.unwrap(),
        WithdrawalOutcome::InsufficientBalance
    );

    h.exchange.set_balance("ETH", dec!(1.5));
    h.exchange.set_price("ETHUSDT", dec!(2900));
    assert_eq!(
        service.evaluate(&rule).await.unwrap(),
        WithdrawalOutcome::BelowTrigger
    );
    assert!(h.exchange.withdrawals().is_empty());

    h.exchange.set_price("ETHUSDT", dec!(3000));
    assert_eq!(
        service.evaluate(&rule).await.unwrap(),
        WithdrawalOutcome::Withdrawn {
            tx_id: "wd-1".into()
        }
    );

    let sent = h.exchange.withdrawals();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].amount, dec!(1));
    assert_eq!(sent[0].address, "0xfeed");

    let history = h.store.withdrawal_history(USER).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "PENDING");
    assert_eq!(history[0].rule_id, Some(rule.id));
}

#[tokio::test]
async fn withdrawal_without_trigger_ignores_the_price() {
    let h = Harness::new();
    let service = WithdrawalService::new(h.store.clone(), h.provider.clone());
    let rule = h
        .store
        .create_withdrawal_rule(WithdrawalRule {
            trigger_price: None,
            ..eth_rule()
        })
        .await
        .unwrap();
    h.exchange.set_balance("ETH", dec!(2));

    // No ETHUSDT price is scripted; a lookup would fail
    assert!(matches!(
        service.evaluate(&rule).await.unwrap(),
        WithdrawalOutcome::Withdrawn { .. }
    ));
}

#[tokio::test]
async fn single_dual_plan_buys_again_after_settlement() {
    let h = Harness::new();
    let service = DualInvestmentService::new(h.store.clone(), h.provider.clone());
    h.store
        .upsert_dual_product(&product(dec!(10), dec!(0.08)))
        .await
        .unwrap();
    let strategy = h
        .store
        .create_dual_strategy(plan(DualInvestmentType::Single))
        .await
        .unwrap();

    let outcome = service.execute(&strategy).await.unwrap();
    assert!(matches!(outcome, DualOutcome::Purchased { .. }));
    assert_eq!(
        service.execute(&strategy).await.unwrap(),
        DualOutcome::Holding
    );

    let orders = h.store.dual_orders_for_strategy(strategy.id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].amount, dec!(100));
    assert_eq!(orders[0].currency, "USDT");
    assert_eq!(
        orders[0].settles_at - orders[0].purchased_at,
        ChronoDuration::days(7)
    );

    assert_eq!(service.settle_due(Utc::now()).await.unwrap(), 0);
    let later = Utc::now() + ChronoDuration::days(8);
    assert_eq!(service.settle_due(later).await.unwrap(), 1);
    assert_eq!(
        h.store.dual_orders_for_strategy(strategy.id).await.unwrap()[0].status,
        DualOrderStatus::Settled
    );

    assert!(matches!(
        service.execute(&strategy).await.unwrap(),
        DualOutcome::Purchased { .. }
    ));
}

#[tokio::test]
async fn ladder_plan_stops_after_its_steps() {
    let h = Harness::new();
    let service = DualInvestmentService::new(h.store.clone(), h.provider.clone());
    h.store
        .upsert_dual_product(&product(dec!(10), dec!(0.08)))
        .await
        .unwrap();
    let strategy = h
        .store
        .create_dual_strategy(plan(DualInvestmentType::Ladder))
        .await
        .unwrap();

    for _ in 0..3 {
        assert!(matches!(
            service.execute(&strategy).await.unwrap(),
            DualOutcome::Purchased { .. }
        ));
    }
    assert_eq!(
        service.execute(&strategy).await.unwrap(),
        DualOutcome::Holding
    );
    let orders = h.store.dual_orders_for_strategy(strategy.id).await.unwrap();
    assert!(orders.iter().all(|o| o.amount == dec!(50)));
}

#[tokio::test]
async fn dual_purchase_checks_limits_and_yield() {
    let h = Harness::new();
    let service = DualInvestmentService::new(h.store.clone(), h.provider.clone());
    let strategy = h
        .store
        .create_dual_strategy(plan(DualInvestmentType::Single))
        .await
        .unwrap();

    // Unknown product
    assert!(matches!(
        service.execute(&strategy).await,
        Err(EngineError::Validation(_))
    ));

    h.store
        .upsert_dual_product(&product(dec!(500), dec!(0.08)))
        .await
        .unwrap();
    assert!(matches!(
        service.execute(&strategy).await,
        Err(EngineError::Validation(_))
    ));

    h.store
        .upsert_dual_product(&product(dec!(10), dec!(0.03)))
        .await
        .unwrap();
    assert_eq!(
        service.execute(&strategy).await.unwrap(),
        DualOutcome::YieldTooLow
    );

    let mut inactive = product(dec!(10), dec!(0.08));
    inactive.is_active = false;
    h.store.upsert_dual_product(&inactive).await.unwrap();
    assert_eq!(
        service.execute(&strategy).await.unwrap(),
        DualOutcome::ProductInactive
    );
    assert!(h
        .store
        .dual_orders_for_strategy(strategy.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn price_trigger_plan_needs_the_pair_above_trigger() {
    let h = Harness::new();
    let service = DualInvestmentService::new(h.store.clone(), h.provider.clone());
    h.store
        .upsert_dual_product(&product(dec!(10), dec!(0.08)))
        .await
        .unwrap();

    let missing = h
        .store
        .create_dual_strategy(plan(DualInvestmentType::PriceTrigger))
        .await
        .unwrap();
    assert!(matches!(
        service.execute(&missing).await,
        Err(EngineError::Validation(_))
    ));

    let strategy = h
        .store
        .create_dual_strategy(DualStrategy {
            trigger_price: Some(dec!(60000)),
            ..plan(DualInvestmentType::PriceTrigger)
        })
        .await
        .unwrap();
    h.exchange.set_price("BTCUSDT", dec!(59000));
    assert_eq!(
        service.execute(&strategy).await.unwrap(),
        DualOutcome::BelowTrigger
    );

    h.exchange.set_price("BTCUSDT", dec!(61000));
    assert!(matches!(
        service.execute(&strategy).await.unwrap(),
        DualOutcome::Purchased { .. }
    ));
}

#[tokio::test]
async fn price_pass_counts_failed_symbols() {
    let h = Harness::new();
    h.exchange.set_price("BTCUSDT", dec!(65000));
    let scheduler = scheduler(&h, &["BTCUSDT", "NOPEUSDT"]);

    let report = scheduler.price_pass().await.unwrap();
    assert_eq!(
        report,
        PassReport {
            processed: 2,
            failed: 1
        }
    );

    let tick = h
        .store
        .latest_price(Market::Spot, "BTCUSDT")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick.price, dec!(65000));
    assert!(h
        .store
        .latest_price(Market::Spot, "NOPEUSDT")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn order_pass_runs_spot_strategies() {
    let h = Harness::new();
    h.exchange.set_price("BTCUSDT", dec!(100));
    let strategy = h.create(spot(OrderSide::Buy, dec!(0.1), simple())).await;
    let scheduler = scheduler(&h, &[]);

    let report = scheduler.order_pass().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(h.exchange.placed().len(), 1);
    assert!(h.reload(strategy.id).await.is_completed);

    // Nothing runnable and the market order is already terminal
    let report = scheduler.order_pass().await.unwrap();
    assert_eq!(report, PassReport::default());
}

#[tokio::test]
async fn futures_pass_stores_open_positions() {
    let h = Harness::new();
    let now = Utc::now();
    let position = |symbol: &str, amount| Position {
        user_id: 0,
        symbol: symbol.to_string(),
        position_side: PositionSide::Long,
        position_amt: amount,
        entry_price: dec!(2000),
        mark_price: dec!(2010),
        unrealized_pnl: dec!(5),
        liquidation_price: dec!(1800),
        leverage: 10,
        max_notional: dec!(100000),
        margin_type: MarginType::Crossed,
        isolated_margin: dec!(0),
        updated_at: now,
    };
    h.exchange.push_position(position("ETHUSDT", dec!(0.5)));
    h.exchange.push_position(position("BTCUSDT", dec!(0)));
    let scheduler = scheduler(&h, &[]);

    let report = scheduler.futures_pass().await.unwrap();
    assert_eq!(
        report,
        PassReport {
            processed: 1,
            failed: 0
        }
    );

    let stored = h.store.positions_for_user(USER).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].symbol, "ETHUSDT");
    assert_eq!(stored[0].user_id, USER);
}

#[tokio::test]
async fn withdrawal_pass_reports_per_rule() {
    let h = Harness::new();
    h.store.create_withdrawal_rule(eth_rule()).await.unwrap();
    h.store
        .create_withdrawal_rule(WithdrawalRule {
            user_id: 404,
            ..eth_rule()
        })
        .await
        .unwrap();
    h.exchange.set_balance("ETH", dec!(0.1));
    let scheduler = scheduler(&h, &[]);

    // The second rule belongs to a user without keys
    let report = scheduler.withdrawal_pass().await.unwrap();
    assert_eq!(
        report,
        PassReport {
            processed: 2,
            failed: 1
        }
    );
}

#[tokio::test]
async fn dual_pass_purchases_and_settles() {
    let h = Harness::new();
    h.store
        .upsert_dual_product(&product(dec!(10), dec!(0.08)))
        .await
        .unwrap();
    let strategy = h
        .store
        .create_dual_strategy(plan(DualInvestmentType::AutoReinvest))
        .await
        .unwrap();
    let scheduler = scheduler(&h, &[]);

    // One plan plus the settlement sweep
    let report = scheduler.dual_pass().await.unwrap();
    assert_eq!(
        report,
        PassReport {
            processed: 2,
            failed: 0
        }
    );
    assert_eq!(
        h.store
            .dual_orders_for_strategy(strategy.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn loops_run_until_shutdown() {
    let h = Harness::new();
    let scheduler = Arc::new(scheduler(&h, &["BTCUSDT"]));
    h.exchange.set_price("BTCUSDT", dec!(100));
    let shutdown = GracefulShutdown::new(Duration::from_secs(5));

    let loops = scheduler.start(shutdown.token());
    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown(ShutdownSignal::Graceful);
    for handle in loops {
        handle.await.unwrap();
    }

    for name in [PRICE_LOOP, ORDER_LOOP, WITHDRAWAL_LOOP, DUAL_LOOP, FUTURES_LOOP] {
        let stats = scheduler.stats(name).unwrap();
        assert!(stats.iterations >= 1, "{name} never ran");
        assert_eq!(stats.panics, 0);
        assert!(stats.last_run.is_some());
    }
    assert!(h
        .store
        .latest_price(Market::Spot, "BTCUSDT")
        .await
        .unwrap()
        .is_some());
}
