use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::coordination::TaskSupervisor;
use crate::domain::{
    Market, NewOrder, Order, OrderRequest, OrderSide, Strategy, StrategyConfig, StrategyState,
};
use crate::error::{EngineError, Result};
use crate::exchange::{ExchangeApi, ExchangeProvider};
use crate::persistence::Store;

/// What one evaluation of a strategy did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick holds the lease
    LeaseHeld,
    /// Inactive or completed by the time the lease was taken
    Inactive,
    /// Price outside the trigger or grid bounds
    NotTriggered,
    /// Orders are working; nothing to do this tick
    Waiting,
    /// New orders were placed
    Submitted(usize),
    Completed,
}

/// Buy when the price is at or below the trigger, sell when at or above.
/// No trigger always fires.
pub fn trigger_hit(side: OrderSide, price: Decimal, trigger: Option<Decimal>) -> bool {
    match trigger {
        None => true,
        Some(trigger) => match side {
            OrderSide::Buy => price <= trigger,
            OrderSide::Sell => price >= trigger,
        },
    }
}

/// Evaluates persisted strategies against the exchange.
///
/// Every evaluation runs under a lease on the strategy row, so a slow tick
/// and the next one never act on the same strategy at once.
pub struct StrategyEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) exchanges: Arc<dyn ExchangeProvider>,
    pub(crate) tasks: Arc<TaskSupervisor>,
    pub(crate) lease: chrono::Duration,
    pub(crate) protective_delay: Duration,
}

impl StrategyEngine {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn Store>,
        exchanges: Arc<dyn ExchangeProvider>,
        tasks: Arc<TaskSupervisor>,
    ) -> Self {
        Self {
            store,
            exchanges,
            tasks,
            lease: chrono::Duration::seconds(config.lease_secs as i64),
            protective_delay: Duration::from_secs(config.protective_order_delay_secs),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn exchanges(&self) -> &Arc<dyn ExchangeProvider> {
        &self.exchanges
    }

    /// Claim the strategy, evaluate it once and release the claim, also
    /// when the evaluation fails.
    #[instrument(skip(self, strategy), fields(strategy_id = strategy.id, family = %strategy.family()))]
    pub async fn execute(&self, strategy: &Strategy) -> Result<TickOutcome> {
        let now = Utc::now();
        if !self
            .store
            .try_claim_strategy(strategy.id, now + self.lease, now)
            .await?
        {
            debug!("Lease held elsewhere, skipping");
            return Ok(TickOutcome::LeaseHeld);
        }

        let outcome = self.execute_claimed(strategy.id).await;

        if let Err(e) = self.store.release_strategy(strategy.id).await {
            warn!(error = %e, "Failed to release strategy lease");
        }

        match &outcome {
            Ok(TickOutcome::Submitted(count)) => info!(orders = count, "Strategy placed orders"),
            Ok(TickOutcome::Completed) => info!("Strategy completed"),
            Ok(other) => debug!(outcome = ?other, "Strategy evaluated"),
            Err(e) => warn!(error = %e, "Strategy evaluation failed"),
        }
        outcome
    }

    async fn execute_claimed(&self, strategy_id: i64) -> Result<TickOutcome> {
        // Re-read under the lease; the caller's copy may predate another tick.
        let strategy = self
            .store
            .get_strategy(strategy_id)
            .await?
            .ok_or(EngineError::StrategyNotFound(strategy_id))?;
        if !strategy.is_runnable() {
            return Ok(TickOutcome::Inactive);
        }

        let exchange = self.exchanges.for_user(strategy.user_id).await?;
        let price = exchange.price(strategy.market, &strategy.symbol).await?;

        match (strategy.market, &strategy.config) {
            (Market::Spot, StrategyConfig::Simple(_)) => {
                self.run_spot_simple(&strategy, &exchange, price).await
            }
            (Market::Spot, StrategyConfig::Grid(grid)) => {
                self.run_grid(&strategy, grid, &exchange, price).await
            }
            (Market::Spot, StrategyConfig::RecurringBuy(plan)) => {
                self.run_recurring_buy(&strategy, plan, &exchange).await
            }
            (Market::Futures, StrategyConfig::Simple(_)) => {
                self.run_futures_simple(&strategy, &exchange, price).await
            }
            (_, StrategyConfig::Iceberg(layered)) => {
                self.run_iceberg(&strategy, layered, &exchange, price).await
            }
            (_, StrategyConfig::SlowIceberg(layered)) => {
                self.run_slow_iceberg(&strategy, layered, &exchange, price).await
            }
            (market, config) => Err(EngineError::Validation(format!(
                "{} strategies are not available on {market} markets",
                config.family()
            ))),
        }
    }

    /// Mark the strategy finished and report it.
    pub(crate) async fn complete(&self, strategy: &Strategy) -> Result<TickOutcome> {
        self.store.mark_strategy_completed(strategy.id).await?;
        Ok(TickOutcome::Completed)
    }

    /// Place `request` and persist the resulting order, together with the
    /// strategy state when one is given.
    pub(crate) async fn submit(
        &self,
        strategy: &Strategy,
        exchange: &Arc<dyn ExchangeApi>,
        request: OrderRequest,
        layer: Option<usize>,
        state: Option<&StrategyState>,
    ) -> Result<Order> {
        let report = exchange.place_order(&request).await?;
        let order = self
            .store
            .record_submission(
                NewOrder::new(
                    strategy.user_id,
                    Some(strategy.id),
                    layer.map(|l| l as i32),
                    request,
                    report,
                ),
                state,
            )
            .await?;
        info!(
            order_id = order.id,
            exchange_order_id = %order.exchange_order_id,
            side = %order.side,
            order_type = order.order_type.as_str(),
            quantity = %order.quantity,
            price = ?order.price,
            layer = ?order.layer,
            "Order submitted"
        );
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trigger_direction_follows_side() {
        assert!(trigger_hit(OrderSide::Buy, dec!(99), Some(dec!(100))));
        assert!(trigger_hit(OrderSide::Buy, dec!(100), Some(dec!(100))));
        assert!(!trigger_hit(OrderSide::Buy, dec!(105), Some(dec!(100))));

        assert!(trigger_hit(OrderSide::Sell, dec!(105), Some(dec!(100))));
        assert!(!trigger_hit(OrderSide::Sell, dec!(99), Some(dec!(100))));
    }

    #[test]
    fn missing_trigger_always_fires() {
        assert!(trigger_hit(OrderSide::Buy, dec!(1_000_000), None));
        assert!(trigger_hit(OrderSide::Sell, dec!(0.0001), None));
    }
}
