//! Periodic loops driving the engine.
//!
//! | loop       | default | work                                          |
//! |------------|---------|-----------------------------------------------|
//! | prices     | 30s     | refresh the configured spot symbols           |
//! | orders     | 30s     | reconcile open orders, then spot strategies   |
//! | withdrawal | 5m      | evaluate automatic withdrawal rules           |
//! | dual       | 1h      | execute dual-investment plans, then settle    |
//! | futures    | 1m      | futures strategies, then position snapshots   |
//!
//! Each loop is its own task. An iteration that panics is logged and
//! counted; the loop carries on with the next tick. Every item inside an
//! iteration runs under the per-item timeout, and a panicking item only
//! costs itself.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::dual_investment::DualInvestmentService;
use super::order_monitor::OrderReconciler;
use super::position_sync::PositionSync;
use super::price_feed::PriceFeed;
use super::withdrawal::WithdrawalService;
use crate::config::{AppConfig, SchedulerConfig};
use crate::coordination::{ShutdownToken, TaskSupervisor};
use crate::domain::Market;
use crate::error::Result;
use crate::exchange::ExchangeProvider;
use crate::persistence::Store;
use crate::strategy::StrategyEngine;

pub const PRICE_LOOP: &str = "prices";
pub const ORDER_LOOP: &str = "orders";
pub const WITHDRAWAL_LOOP: &str = "withdrawal";
pub const DUAL_LOOP: &str = "dual";
pub const FUTURES_LOOP: &str = "futures";

/// Items handled by one iteration of a loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub processed: usize,
    pub failed: usize,
}

impl PassReport {
    fn absorb(&mut self, other: PassReport) {
        self.processed += other.processed;
        self.failed += other.failed;
    }

    fn record<T>(&mut self, outcome: Option<T>) -> Option<T> {
        self.processed += 1;
        if outcome.is_none() {
            self.failed += 1;
        }
        outcome
    }
}

/// Running totals for one loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    pub iterations: u64,
    /// Iterations that returned an error or panicked
    pub failures: u64,
    pub panics: u64,
    /// Items that failed or timed out, across all iterations
    pub item_failures: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
}

pub struct Scheduler {
    engine: Arc<StrategyEngine>,
    reconciler: OrderReconciler,
    withdrawals: WithdrawalService,
    dual: DualInvestmentService,
    positions: PositionSync,
    prices: PriceFeed,
    config: SchedulerConfig,
    stats: DashMap<&'static str, LoopStats>,
}

impl Scheduler {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn Store>,
        exchanges: Arc<dyn ExchangeProvider>,
        tasks: Arc<TaskSupervisor>,
    ) -> Self {
        let engine = Arc::new(StrategyEngine::new(
            &config.engine,
            Arc::clone(&store),
            Arc::clone(&exchanges),
            tasks,
        ));
        let scheduler = &config.scheduler;
        Self {
            reconciler: OrderReconciler::new(
                Arc::clone(&store),
                Arc::clone(&exchanges),
                scheduler.reconcile_batch,
                scheduler.item_timeout(),
                chrono::Duration::seconds(config.engine.lease_secs as i64),
            ),
            withdrawals: WithdrawalService::new(Arc::clone(&store), Arc::clone(&exchanges)),
            dual: DualInvestmentService::new(Arc::clone(&store), Arc::clone(&exchanges)),
            positions: PositionSync::new(Arc::clone(&store), Arc::clone(&exchanges)),
            prices: PriceFeed::new(store, exchanges, scheduler.price_symbols.clone()),
            engine,
            config: scheduler.clone(),
            stats: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<StrategyEngine> {
        &self.engine
    }

    pub fn stats(&self, name: &str) -> Option<LoopStats> {
        self.stats.get(name).map(|s| s.clone())
    }

    /// Spawn the five loops. They stop at the next tick boundary once
    /// `token` fires.
    pub fn start(self: &Arc<Self>, token: ShutdownToken) -> Vec<JoinHandle<()>> {
        let secs = Duration::from_secs;
        info!(
            prices = self.config.price_interval_secs,
            orders = self.config.order_interval_secs,
            withdrawal = self.config.withdrawal_interval_secs,
            dual = self.config.dual_investment_interval_secs,
            futures = self.config.futures_interval_secs,
            "Starting scheduler loops"
        );
        let config = &self.config;
        vec![
            self.spawn_loop(
                PRICE_LOOP,
                secs(config.price_interval_secs),
                token.clone(),
                |s| async move { s.price_pass().await },
            ),
            self.spawn_loop(
                ORDER_LOOP,
                secs(config.order_interval_secs),
                token.clone(),
                |s| async move { s.order_pass().await },
            ),
            self.spawn_loop(
                WITHDRAWAL_LOOP,
                secs(config.withdrawal_interval_secs),
                token.clone(),
                |s| async move { s.withdrawal_pass().await },
            ),
            self.spawn_loop(
                DUAL_LOOP,
                secs(config.dual_investment_interval_secs),
                token.clone(),
                |s| async move { s.dual_pass().await },
            ),
            self.spawn_loop(
                FUTURES_LOOP,
                secs(config.futures_interval_secs),
                token,
                |s| async move { s.futures_pass().await },
            ),
        ]
    }

    fn spawn_loop<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        mut token: ShutdownToken,
        pass: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<PassReport>> + Send + 'static,
    {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.wait_for_shutdown() => break,
                    _ = ticker.tick() => {}
                }

                let started = Instant::now();
                let result = AssertUnwindSafe(pass(Arc::clone(&scheduler)))
                    .catch_unwind()
                    .await;
                scheduler.record_iteration(name, started, result);
            }
            info!(task = name, "Scheduler loop stopped");
        })
    }

    fn record_iteration(
        &self,
        name: &'static str,
        started: Instant,
        result: std::thread::Result<Result<PassReport>>,
    ) {
        let elapsed = started.elapsed();
        let mut stats = self.stats.entry(name).or_default();
        stats.iterations += 1;
        stats.last_run = Some(Utc::now());
        stats.last_duration = Some(elapsed);

        match result {
            Ok(Ok(report)) => {
                stats.item_failures += report.failed as u64;
                debug!(
                    task = name,
                    processed = report.processed,
                    failed = report.failed,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Scheduler iteration finished"
                );
            }
            Ok(Err(e)) => {
                stats.failures += 1;
                warn!(task = name, error = %e, "Scheduler iteration failed");
            }
            Err(panic) => {
                stats.failures += 1;
                stats.panics += 1;
                error!(task = name, panic = %panic_message(&*panic), "Scheduler iteration panicked");
            }
        }
    }

    /// Run `item` under the per-item timeout. Failures are logged and come
    /// back as `None`.
    async fn within<T, F>(&self, what: &str, id: i64, item: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        run_item(what, id, self.config.item_timeout(), item).await
    }

    pub async fn price_pass(&self) -> Result<PassReport> {
        let mut report = PassReport::default();
        for symbol in self.prices.symbols() {
            let outcome = match tokio::time::timeout(
                self.config.item_timeout(),
                self.prices.refresh(symbol),
            )
            .await
            {
                Ok(Ok(tick)) => Some(tick),
                Ok(Err(e)) => {
                    warn!(%symbol, error = %e, "Price refresh failed");
                    None
                }
                Err(_) => {
                    warn!(%symbol, "Price refresh timed out");
                    None
                }
            };
            report.record(outcome);
        }
        Ok(report)
    }

    /// Reconcile first so strategies see the latest fills.
    pub async fn order_pass(&self) -> Result<PassReport> {
        let mut report = PassReport::default();
        match self.reconciler.reconcile().await {
            Ok(stats) => report.absorb(PassReport {
                processed: stats.checked,
                failed: stats.failed,
            }),
            Err(e) => {
                warn!(error = %e, "Could not load open orders");
                report.failed += 1;
            }
        }
        report.absorb(self.strategy_pass(Market::Spot).await?);
        Ok(report)
    }

    pub async fn strategy_pass(&self, market: Market) -> Result<PassReport> {
        let mut report = PassReport::default();
        for strategy in self.engine.store().runnable_strategies(market).await? {
            report.record(
                self.within("strategy", strategy.id, self.engine.execute(&strategy))
                    .await,
            );
        }
        Ok(report)
    }

    pub async fn withdrawal_pass(&self) -> Result<PassReport> {
        let mut report = PassReport::default();
        for rule in self.withdrawals.rules().await? {
            report.record(
                self.within("withdrawal_rule", rule.id, self.withdrawals.evaluate(&rule))
                    .await,
            );
        }
        Ok(report)
    }

    pub async fn dual_pass(&self) -> Result<PassReport> {
        let mut report = PassReport::default();
        for strategy in self.dual.strategies().await? {
            report.record(
                self.within("dual_strategy", strategy.id, self.dual.execute(&strategy))
                    .await,
            );
        }
        if let Some(settled) = report.record(
            self.within("dual_settlement", 0, self.dual.settle_due(Utc::now()))
                .await,
        ) {
            if settled > 0 {
                info!(settled, "Dual orders settled");
            }
        }
        Ok(report)
    }

    pub async fn futures_pass(&self) -> Result<PassReport> {
        let mut report = self.strategy_pass(Market::Futures).await?;
        match self.positions.users().await {
            Ok(users) => {
                for user_id in users {
                    report.record(
                        self.within("positions", user_id, self.positions.refresh_user(user_id))
                            .await,
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not list users with credentials");
                report.failed += 1;
            }
        }
        Ok(report)
    }
}

/// One scheduled item: errors, timeouts and panics all end as `None` so the
/// rest of the pass still runs.
async fn run_item<T, F>(what: &str, id: i64, timeout: Duration, item: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(item).catch_unwind()).await {
        Ok(Ok(Ok(value))) => Some(value),
        Ok(Ok(Err(e))) => {
            warn!(item = what, id, error = %e, "Scheduled item failed");
            None
        }
        Ok(Err(panic)) => {
            error!(item = what, id, panic = %panic_message(&*panic), "Scheduled item panicked");
            None
        }
        Err(_) => {
            warn!(item = what, id, ?timeout, "Scheduled item timed out");
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_report_counts_failures() {
        let mut report = PassReport::default();
        report.record(Some(1));
        report.record::<()>(None);
        report.absorb(PassReport {
            processed: 3,
            failed: 1,
        });
        assert_eq!(report, PassReport { processed: 5, failed: 2 });
    }

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }

    #[tokio::test]
    async fn a_panicking_item_does_not_stop_the_pass() {
        let timeout = Duration::from_secs(1);
        let mut report = PassReport::default();
        for id in 1..=3 {
            let item = async move {
                if id == 2 {
                    panic!("item {id} blew up");
                }
                Ok::<_, crate::error::EngineError>(id)
            };
            report.record(run_item("strategy", id, timeout, item).await);
        }
        assert_eq!(report, PassReport { processed: 3, failed: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn slow_items_time_out() {
        let item = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, crate::error::EngineError>(())
        };
        assert!(run_item("strategy", 1, Duration::from_secs(5), item).await.is_none());
    }
}
