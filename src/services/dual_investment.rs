//! Recurring dual-investment plans.
//!
//! Purchases are recorded locally with a generated reference and settle
//! `duration_days` after the purchase.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    DualInvestmentType, DualOrder, DualOrderStatus, DualStrategy, Market, NewDualOrder,
};
use crate::error::{EngineError, Result};
use crate::exchange::ExchangeProvider;
use crate::persistence::Store;

/// What executing one plan did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DualOutcome {
    /// A live order exists or every ladder step is taken
    Holding,
    BelowTrigger,
    /// Product yield under the plan's minimum
    YieldTooLow,
    ProductInactive,
    Purchased { order_ref: String },
}

/// Amount to buy this round, or `None` when the plan is holding.
///
/// `orders` are the plan's orders, oldest first. Price triggers are
/// checked by the caller.
pub fn next_purchase(strategy: &DualStrategy, orders: &[DualOrder]) -> Option<Decimal> {
    let live = orders.iter().any(|o| o.status.is_live());
    match strategy.investment_type {
        DualInvestmentType::Single | DualInvestmentType::PriceTrigger => {
            (!live).then_some(strategy.amount)
        }
        DualInvestmentType::AutoReinvest => match orders.last() {
            None => Some(strategy.amount),
            Some(last) if last.status == DualOrderStatus::Settled => Some(strategy.amount),
            Some(_) => None,
        },
        DualInvestmentType::Ladder => {
            let purchased = orders
                .iter()
                .filter(|o| o.status == DualOrderStatus::Purchased)
                .count();
            (purchased < strategy.ladder_steps as usize).then_some(strategy.amount_per_step)
        }
    }
}

pub struct DualInvestmentService {
    store: Arc<dyn Store>,
    exchanges: Arc<dyn ExchangeProvider>,
}

impl DualInvestmentService {
    pub fn new(store: Arc<dyn Store>, exchanges: Arc<dyn ExchangeProvider>) -> Self {
        Self { store, exchanges }
    }

    pub async fn strategies(&self) -> Result<Vec<DualStrategy>> {
        self.store.active_dual_strategies().await
    }

    #[instrument(skip(self, strategy), fields(dual_strategy_id = strategy.id, user_id = strategy.user_id, kind = strategy.investment_type.as_str()))]
    pub async fn execute(&self, strategy: &DualStrategy) -> Result<DualOutcome> {
        if strategy.investment_type == DualInvestmentType::PriceTrigger {
            let trigger = strategy
                .trigger_price
                .filter(|t| *t > Decimal::ZERO)
                .ok_or_else(|| {
                    EngineError::Validation(format!(
                        "price-trigger plan {} needs a trigger price",
                        strategy.id
                    ))
                })?;
            let exchange = self.exchanges.for_user(strategy.user_id).await?;
            let price = exchange.price(Market::Spot, &strategy.pair()).await?;
            if price < trigger {
                debug!(%price, %trigger, "Dual trigger not reached");
                return Ok(DualOutcome::BelowTrigger);
            }
        }

        let orders = self.store.dual_orders_for_strategy(strategy.id).await?;
        let Some(amount) = next_purchase(strategy, &orders) else {
            return Ok(DualOutcome::Holding);
        };
        self.purchase(strategy, amount, Utc::now()).await
    }

    async fn purchase(
        &self,
        strategy: &DualStrategy,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<DualOutcome> {
        let product = self
            .store
            .dual_product(&strategy.product_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("unknown dual product {}", strategy.product_id))
            })?;
        if !product.is_active {
            debug!(product_id = %product.product_id, "Dual product inactive");
            return Ok(DualOutcome::ProductInactive);
        }
        if !product.accepts(amount) {
            return Err(EngineError::Validation(format!(
                "amount {amount} outside product limits {}..={}",
                product.min_amount, product.max_amount
            )));
        }
        if product.yield_rate < strategy.min_yield_rate {
            debug!(yield_rate = %product.yield_rate, min = %strategy.min_yield_rate, "Dual yield below minimum");
            return Ok(DualOutcome::YieldTooLow);
        }

        let order = self
            .store
            .insert_dual_order(NewDualOrder {
                user_id: strategy.user_id,
                strategy_id: strategy.id,
                product_id: product.product_id.clone(),
                order_ref: Uuid::new_v4().to_string(),
                amount,
                currency: strategy.quote_asset.clone(),
                yield_rate: product.yield_rate,
                purchased_at: now,
                settles_at: now + Duration::days(product.duration_days),
            })
            .await?;

        info!(
            order_ref = %order.order_ref,
            %amount,
            currency = %order.currency,
            yield_rate = %order.yield_rate,
            settles_at = %order.settles_at,
            "Dual investment purchased"
        );
        Ok(DualOutcome::Purchased {
            order_ref: order.order_ref,
        })
    }

    /// Settle purchased orders whose settlement time has passed.
    pub async fn settle_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut settled = 0;
        for order in self.store.due_dual_orders(now).await? {
            match self.store.settle_dual_order(order.id, now).await {
                Ok(true) => {
                    info!(order_ref = %order.order_ref, amount = %order.amount, "Dual investment settled");
                    settled += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(order_ref = %order.order_ref, error = %e, "Failed to settle dual order"),
            }
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(kind: DualInvestmentType) -> DualStrategy {
        DualStrategy {
            id: 1,
            user_id: 1,
            product_id: "BTC-USDT-7D".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            investment_type: kind,
            amount: dec!(100),
            trigger_price: None,
            min_yield_rate: dec!(0.05),
            ladder_steps: 2,
            amount_per_step: dec!(50),
            is_active: true,
        }
    }

    fn order(status: DualOrderStatus) -> DualOrder {
        let now = Utc::now();
        DualOrder {
            id: 1,
            user_id: 1,
            strategy_id: Some(1),
            product_id: "BTC-USDT-7D".into(),
            order_ref: "ref".into(),
            amount: dec!(100),
            currency: "USDT".into(),
            yield_rate: dec!(0.1),
            status,
            purchased_at: now,
            settles_at: now,
        }
    }

    #[test]
    fn single_waits_for_the_live_order() {
        let single = plan(DualInvestmentType::Single);
        assert_eq!(next_purchase(&single, &[]), Some(dec!(100)));
        assert_eq!(next_purchase(&single, &[order(DualOrderStatus::Purchased)]), None);
        assert_eq!(
            next_purchase(&single, &[order(DualOrderStatus::Settled)]),
            Some(dec!(100))
        );
    }

    #[test]
    fn auto_reinvest_follows_the_last_order() {
        let auto = plan(DualInvestmentType::AutoReinvest);
        assert_eq!(next_purchase(&auto, &[order(DualOrderStatus::Failed)]), None);
        assert_eq!(
            next_purchase(
                &auto,
                &[order(DualOrderStatus::Failed), order(DualOrderStatus::Settled)]
            ),
            Some(dec!(100))
        );
    }

    #[test]
    fn ladder_stops_at_the_step_count() {
        let ladder = plan(DualInvestmentType::Ladder);
        let one = [order(DualOrderStatus::Purchased)];
        assert_eq!(next_purchase(&ladder, &one), Some(dec!(50)));
        let two = [
            order(DualOrderStatus::Purchased),
            order(DualOrderStatus::Purchased),
        ];
        assert_eq!(next_purchase(&ladder, &two), None);
    }
}
