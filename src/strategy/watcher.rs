//! Iceberg timeout handling, shared by the background watcher and by ticks
//! that find an expired iceberg (for example after a restart).

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::engine::StrategyEngine;
use crate::coordination::ShutdownToken;
use crate::domain::{Order, OrderStatus, OrderUpdate, Strategy, StrategyEvent};
use crate::error::{EngineError, Result};
use crate::exchange::ExchangeApi;
use crate::persistence::Store;

/// Result of cancelling the open layers of an iceberg
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerSweep {
    pub canceled: usize,
    /// Layers whose cancel failed; they keep their local status
    pub still_open: usize,
}

impl LayerSweep {
    pub fn all_terminal(&self) -> bool {
        self.still_open == 0
    }
}

pub(crate) fn layer_orders(orders: Vec<Order>) -> Vec<Order> {
    orders.into_iter().filter(|o| o.layer.is_some()).collect()
}

/// Cancel every open layer order of `strategy`, recording any fills the
/// cancel acknowledgement reports.
pub(crate) async fn cancel_open_layers(
    store: &dyn Store,
    exchange: &dyn ExchangeApi,
    strategy: &Strategy,
) -> Result<LayerSweep> {
    let mut state = strategy.state.clone();
    let mut sweep = LayerSweep::default();

    for order in layer_orders(store.orders_for_strategy(strategy.id).await?) {
        if !order.is_open() {
            continue;
        }
        match exchange
            .cancel_order(order.market, &order.symbol, &order.exchange_order_id)
            .await
        {
            Ok(report) => {
                let executed = report.executed_qty.max(order.executed_qty);
                state.record_fill(
                    &order.exchange_order_id,
                    executed,
                    order.layer == Some(state.current_layer as i32),
                );
                let status = if report.status.is_terminal() {
                    report.status
                } else {
                    OrderStatus::Canceled
                };
                let update = OrderUpdate {
                    order_id: order.id,
                    status,
                    executed_qty: executed,
                    cumulative_quote_qty: report.cumulative_quote_qty.max(order.cumulative_quote_qty),
                };
                store
                    .apply_order_update(&update, Some((strategy.id, &state)))
                    .await?;
                sweep.canceled += 1;
            }
            Err(e) => {
                warn!(
                    strategy_id = strategy.id,
                    order_id = order.id,
                    layer = ?order.layer,
                    error = %e,
                    "Failed to cancel layer order"
                );
                sweep.still_open += 1;
            }
        }
    }
    Ok(sweep)
}

impl StrategyEngine {
    /// Sleep through the iceberg timeout in the background, then cancel
    /// what is still open.
    pub(crate) async fn spawn_iceberg_watcher(
        &self,
        strategy: &Strategy,
        exchange: &Arc<dyn ExchangeApi>,
        timeout: Duration,
    ) {
        let task = watch_iceberg(
            Arc::clone(&self.store),
            Arc::clone(exchange),
            strategy.id,
            timeout,
            self.lease,
            self.tasks.token(),
        );
        self.tasks.spawn("iceberg-timeout", task).await;
    }
}

async fn watch_iceberg(
    store: Arc<dyn Store>,
    exchange: Arc<dyn ExchangeApi>,
    strategy_id: i64,
    timeout: Duration,
    lease: chrono::Duration,
    mut token: ShutdownToken,
) {
    if !token.sleep(timeout).await {
        return;
    }

    let now = Utc::now();
    match store.try_claim_strategy(strategy_id, now + lease, now).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(strategy_id, "Strategy busy, next tick handles the timeout");
            return;
        }
        Err(e) => {
            warn!(strategy_id, error = %e, "Iceberg watcher could not claim strategy");
            return;
        }
    }

    let outcome = expire_iceberg(store.as_ref(), exchange.as_ref(), strategy_id).await;

    if let Err(e) = store.release_strategy(strategy_id).await {
        warn!(strategy_id, error = %e, "Failed to release strategy lease");
    }

    let event = match outcome {
        Ok(None) => return,
        Ok(Some(sweep)) => {
            info!(strategy_id, canceled = sweep.canceled, still_open = sweep.still_open, "Iceberg timeout handled");
            StrategyEvent::new(
                strategy_id,
                "iceberg_timeout",
                sweep.all_terminal(),
                format!(
                    "canceled {} layer(s), {} still open",
                    sweep.canceled, sweep.still_open
                ),
            )
        }
        Err(e) => {
            warn!(strategy_id, error = %e, "Iceberg timeout handling failed");
            StrategyEvent::new(strategy_id, "iceberg_timeout", false, e.to_string())
        }
    };
    if let Err(e) = store.record_event(&event).await {
        warn!(strategy_id, error = %e, "Failed to record strategy event");
    }
}

async fn expire_iceberg(
    store: &dyn Store,
    exchange: &dyn ExchangeApi,
    strategy_id: i64,
) -> Result<Option<LayerSweep>> {
    let strategy = store
        .get_strategy(strategy_id)
        .await?
        .ok_or(EngineError::StrategyNotFound(strategy_id))?;
    if !strategy.is_runnable() {
        return Ok(None);
    }

    let sweep = cancel_open_layers(store, exchange, &strategy).await?;
    if sweep.all_terminal() {
        store.mark_strategy_completed(strategy_id).await?;
    }
    Ok(Some(sweep))
}
