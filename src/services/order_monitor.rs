//! Order reconciliation
//!
//! Each pass takes a batch of non-terminal orders, asks the exchange for
//! their current status and writes back status, executed quantity and
//! cumulative quote. Fills of layered strategies are also folded into the
//! strategy state, once per exchange order id.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{Order, OrderUpdate};
use crate::error::{EngineError, Result};
use crate::exchange::{ExchangeApi, ExchangeProvider};
use crate::persistence::Store;

/// Counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub checked: usize,
    pub updated: usize,
    /// Orders of strategies busy elsewhere; retried next pass
    pub deferred: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    Unchanged,
    Updated,
    Deferred,
}

/// Brings local order rows in line with the exchange.
pub struct OrderReconciler {
    store: Arc<dyn Store>,
    exchanges: Arc<dyn ExchangeProvider>,
    batch: i64,
    item_timeout: Duration,
    lease: chrono::Duration,
}

impl OrderReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        exchanges: Arc<dyn ExchangeProvider>,
        batch: i64,
        item_timeout: Duration,
        lease: chrono::Duration,
    ) -> Self {
        Self {
            store,
            exchanges,
            batch,
            item_timeout,
            lease,
        }
    }

    /// Run one pass over the oldest open orders.
    pub async fn reconcile(&self) -> Result<ReconcileStats> {
        let orders = self.store.open_orders(self.batch).await?;
        let mut stats = ReconcileStats::default();
        if orders.is_empty() {
            return Ok(stats);
        }

        let mut by_user: BTreeMap<i64, Vec<Order>> = BTreeMap::new();
        for order in orders {
            by_user.entry(order.user_id).or_default().push(order);
        }

        for (user_id, orders) in by_user {
            let exchange = match self.exchanges.for_user(user_id).await {
                Ok(exchange) => exchange,
                Err(e) => {
                    warn!(user_id, orders = orders.len(), error = %e, "Skipping reconciliation for user");
                    stats.failed += orders.len();
                    continue;
                }
            };

            for order in orders {
                stats.checked += 1;
                let result =
                    tokio::time::timeout(self.item_timeout, self.reconcile_order(&exchange, &order))
                        .await;
                match result {
                    Ok(Ok(Reconciled::Updated)) => stats.updated += 1,
                    Ok(Ok(Reconciled::Unchanged)) => {}
                    Ok(Ok(Reconciled::Deferred)) => stats.deferred += 1,
                    Ok(Err(e)) => {
                        warn!(order_id = order.id, user_id, error = %e, "Order reconciliation failed");
                        stats.failed += 1;
                    }
                    Err(_) => {
                        warn!(order_id = order.id, user_id, timeout = ?self.item_timeout, "Order reconciliation timed out");
                        stats.failed += 1;
                    }
                }
            }
        }

        if stats.updated > 0 || stats.failed > 0 {
            info!(
                checked = stats.checked,
                updated = stats.updated,
                deferred = stats.deferred,
                failed = stats.failed,
                "Reconciliation pass finished"
            );
        }
        Ok(stats)
    }

    async fn reconcile_order(
        &self,
        exchange: &Arc<dyn ExchangeApi>,
        order: &Order,
    ) -> Result<Reconciled> {
        let report = exchange
            .query_order(order.market, &order.symbol, &order.exchange_order_id)
            .await?;

        if report.status == order.status
            && report.executed_qty == order.executed_qty
            && report.cumulative_quote_qty == order.cumulative_quote_qty
        {
            return Ok(Reconciled::Unchanged);
        }

        let update = OrderUpdate {
            order_id: order.id,
            status: report.status,
            executed_qty: report.executed_qty,
            cumulative_quote_qty: report.cumulative_quote_qty,
        };

        let layered_strategy = match (order.strategy_id, order.layer) {
            (Some(id), Some(_)) => Some(id),
            _ => None,
        };
        let Some(strategy_id) = layered_strategy else {
            let changed = self.store.apply_order_update(&update, None).await?;
            debug!(order_id = order.id, status = %report.status, changed, "Order reconciled");
            return Ok(if changed {
                Reconciled::Updated
            } else {
                Reconciled::Unchanged
            });
        };

        // The state is read-modify-write; hold the strategy like a tick does.
        let now = Utc::now();
        if !self
            .store
            .try_claim_strategy(strategy_id, now + self.lease, now)
            .await?
        {
            debug!(order_id = order.id, strategy_id, "Strategy busy, order deferred");
            return Ok(Reconciled::Deferred);
        }

        let outcome = self.fold_layer_fill(strategy_id, order, &update).await;

        if let Err(e) = self.store.release_strategy(strategy_id).await {
            warn!(strategy_id, error = %e, "Failed to release strategy lease");
        }
        outcome
    }

    async fn fold_layer_fill(
        &self,
        strategy_id: i64,
        order: &Order,
        update: &OrderUpdate,
    ) -> Result<Reconciled> {
        let strategy = self
            .store
            .get_strategy(strategy_id)
            .await?
            .ok_or(EngineError::StrategyNotFound(strategy_id))?;

        if !strategy.family().is_layered() {
            let changed = self.store.apply_order_update(update, None).await?;
            return Ok(if changed {
                Reconciled::Updated
            } else {
                Reconciled::Unchanged
            });
        }

        let mut state = strategy.state.clone();
        let current = order.layer == Some(state.current_layer as i32);
        let delta = state.record_fill(&order.exchange_order_id, update.executed_qty, current);

        let changed = self
            .store
            .apply_order_update(update, Some((strategy_id, &state)))
            .await?;
        debug!(
            order_id = order.id,
            strategy_id,
            layer = ?order.layer,
            %delta,
            status = %update.status,
            "Layer order reconciled"
        );
        Ok(if changed {
            Reconciled::Updated
        } else {
            Reconciled::Unchanged
        })
    }
}
