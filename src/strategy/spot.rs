//! Spot families that place plain orders: simple, grid and recurring buy.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::engine::{trigger_hit, StrategyEngine, TickOutcome};
use crate::domain::{
    GridConfig, Market, OrderRequest, OrderSide, OrderStatus, RecurringBuyConfig, Strategy,
};
use crate::error::Result;
use crate::exchange::ExchangeApi;

/// Grid levels from `lower` to `upper` inclusive, evenly spaced.
pub fn grid_levels(config: &GridConfig) -> Vec<Decimal> {
    let count = config.grid_count.max(2);
    let gap = (config.upper_price - config.lower_price) / Decimal::from(count - 1);
    (0..count)
        .map(|i| config.lower_price + gap * Decimal::from(i))
        .collect()
}

impl StrategyEngine {
    pub(crate) async fn run_spot_simple(
        &self,
        strategy: &Strategy,
        exchange: &Arc<dyn ExchangeApi>,
        price: Decimal,
    ) -> Result<TickOutcome> {
        if !trigger_hit(strategy.side, price, strategy.trigger_price) {
            return Ok(TickOutcome::NotTriggered);
        }

        let request = match strategy.price {
            Some(limit) => OrderRequest::limit(
                Market::Spot,
                &strategy.symbol,
                strategy.side,
                strategy.quantity,
                limit,
            ),
            None => OrderRequest::market(
                Market::Spot,
                &strategy.symbol,
                strategy.side,
                strategy.quantity,
            ),
        };
        self.submit(strategy, exchange, request, None, None).await?;
        self.complete(strategy).await
    }

    pub(crate) async fn run_grid(
        &self,
        strategy: &Strategy,
        grid: &GridConfig,
        exchange: &Arc<dyn ExchangeApi>,
        price: Decimal,
    ) -> Result<TickOutcome> {
        if price < grid.lower_price || price > grid.upper_price {
            debug!(%price, "Price outside grid bounds");
            return Ok(TickOutcome::NotTriggered);
        }

        let open: Vec<Decimal> = self
            .store
            .orders_for_strategy(strategy.id)
            .await?
            .iter()
            .filter(|o| o.is_open())
            .filter_map(|o| o.price)
            .collect();
        let capacity = grid.grid_count as usize;
        if open.len() >= capacity {
            return Ok(TickOutcome::Waiting);
        }

        let quantity = strategy.quantity / Decimal::from(grid.grid_count);
        let mut covered = open;
        let mut placed = 0;
        for level in grid_levels(grid) {
            if covered.len() >= capacity {
                break;
            }
            if covered
                .iter()
                .any(|p| (*p - level).abs() < grid.price_tolerance)
            {
                continue;
            }

            let side = if level > price {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let request =
                OrderRequest::limit(Market::Spot, &strategy.symbol, side, quantity, level);
            self.submit(strategy, exchange, request, None, None).await?;
            covered.push(level);
            placed += 1;
        }

        Ok(if placed > 0 {
            TickOutcome::Submitted(placed)
        } else {
            TickOutcome::Waiting
        })
    }

    pub(crate) async fn run_recurring_buy(
        &self,
        strategy: &Strategy,
        plan: &RecurringBuyConfig,
        exchange: &Arc<dyn ExchangeApi>,
    ) -> Result<TickOutcome> {
        let orders = self.store.orders_for_strategy(strategy.id).await?;

        let spent: Decimal = orders
            .iter()
            .filter(|o| o.status == OrderStatus::Filled)
            .map(|o| o.cumulative_quote_qty)
            .sum();
        if spent >= plan.total_amount {
            debug!(%spent, total = %plan.total_amount, "Recurring buy budget reached");
            return self.complete(strategy).await;
        }

        let interval = chrono::Duration::hours(plan.interval_hours as i64);
        let now = Utc::now();
        if let Some(last) = orders.iter().map(|o| o.created_at).max() {
            if now - last < interval {
                return Ok(TickOutcome::Waiting);
            }
        }

        let request = OrderRequest::market(
            Market::Spot,
            &strategy.symbol,
            OrderSide::Buy,
            strategy.quantity,
        );
        self.submit(strategy, exchange, request, None, None).await?;
        Ok(TickOutcome::Submitted(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn grid_levels_span_the_bounds() {
        let grid = GridConfig {
            lower_price: dec!(90),
            upper_price: dec!(110),
            grid_count: 5,
            price_tolerance: dec!(0.001),
        };
        assert_eq!(
            grid_levels(&grid),
            vec![dec!(90), dec!(95), dec!(100), dec!(105), dec!(110)]
        );
    }
}
