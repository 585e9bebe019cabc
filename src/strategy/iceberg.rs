//! Iceberg (all layers at once) and slow iceberg (one layer at a time),
//! on either market.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::engine::{trigger_hit, StrategyEngine, TickOutcome};
use super::futures::{derivatives, position_quantity};
use super::layers::{layer_client_id, layer_price, offsets_bp, ratios, split_quantity};
use super::watcher::{cancel_open_layers, layer_orders};
use crate::domain::{
    LayeredConfig, Market, Order, OrderRequest, OrderSide, OrderStatus, OrderUpdate, Strategy,
    StrategyState, SymbolInfo,
};
use crate::error::Result;
use crate::exchange::{reference_price, ExchangeApi};

/// Offset of layer 0: configured value, else 0 on spot and the strategy's
/// `float_bp` on futures.
fn first_layer_offset(strategy: &Strategy, config: &LayeredConfig) -> Decimal {
    config
        .first_layer_offset_bp
        .unwrap_or(match strategy.market {
            Market::Spot => Decimal::ZERO,
            Market::Futures => strategy.float_bp,
        })
}

fn layer_request(strategy: &Strategy, layer: usize, quantity: Decimal, price: Decimal) -> OrderRequest {
    let request = OrderRequest::limit(
        strategy.market,
        &strategy.symbol,
        strategy.side,
        quantity,
        price,
    )
    .with_client_order_id(layer_client_id(layer));
    match strategy.market {
        Market::Spot => request,
        Market::Futures => request.with_position_side(strategy.side.position_side()),
    }
}

fn timeout_of(config: &LayeredConfig) -> Duration {
    Duration::from_secs(config.timeout_minutes.saturating_mul(60))
}

/// Step past layers whose unfilled rest the exchange would not accept.
/// Returns the tradable rest of the layer now current, or `None` when the
/// split is not fixed yet or every layer is done.
fn advance_filled_layers(
    state: &mut StrategyState,
    layers: usize,
    shares: &[Decimal],
    info: &SymbolInfo,
) -> Option<Decimal> {
    let parts = split_quantity(state.planned_quantity?, shares);
    while state.current_layer < layers {
        let rest = parts[state.current_layer] - state.layer_filled_quantity;
        if let Some(quantity) = info.tradable_quantity(rest) {
            return Some(quantity);
        }
        debug!(layer = state.current_layer, filled = %state.layer_filled_quantity, %rest, "Layer done");
        state.advance_layer();
    }
    None
}

impl StrategyEngine {
    /// Base quantity split across the layers, fixed once the first layer
    /// goes out.
    async fn planned_quantity(
        &self,
        strategy: &Strategy,
        state: &StrategyState,
        exchange: &Arc<dyn ExchangeApi>,
        base: Decimal,
    ) -> Result<Decimal> {
        if let Some(planned) = state.planned_quantity {
            return Ok(planned);
        }
        match strategy.market {
            Market::Spot => Ok(strategy.quantity),
            Market::Futures => {
                let params = derivatives(strategy)?;
                self.prepare_futures_account(strategy, params, exchange).await;
                position_quantity(params, base)
            }
        }
    }

    async fn layer_base_price(
        &self,
        strategy: &Strategy,
        exchange: &Arc<dyn ExchangeApi>,
        last: Decimal,
    ) -> Result<Decimal> {
        let book = exchange.depth(strategy.market, &strategy.symbol).await?;
        Ok(reference_price(&book, last, strategy.side == OrderSide::Buy))
    }

    async fn protect_layered_entry(
        &self,
        strategy: &Strategy,
        exchange: &Arc<dyn ExchangeApi>,
        entry: Decimal,
        quantity: Decimal,
    ) -> Result<()> {
        if strategy.market == Market::Futures {
            let params = derivatives(strategy)?;
            self.schedule_protective_orders(strategy, params, exchange, entry, quantity)
                .await;
        }
        Ok(())
    }

    pub(crate) async fn run_iceberg(
        &self,
        strategy: &Strategy,
        config: &LayeredConfig,
        exchange: &Arc<dyn ExchangeApi>,
        price: Decimal,
    ) -> Result<TickOutcome> {
        let orders = layer_orders(self.store.orders_for_strategy(strategy.id).await?);
        let mut state = strategy.state.clone();

        if state.submitted {
            return self.follow_iceberg(strategy, config, exchange, &orders).await;
        }

        // A previous tick may have stopped part way; only missing layers go out.
        let placed: BTreeSet<usize> = orders
            .iter()
            .filter_map(|o| o.layer)
            .map(|l| l as usize)
            .collect();
        let starting = placed.is_empty();
        if starting && !trigger_hit(strategy.side, price, strategy.trigger_price) {
            return Ok(TickOutcome::NotTriggered);
        }

        let base = self.layer_base_price(strategy, exchange, price).await?;
        let total = self.planned_quantity(strategy, &state, exchange, base).await?;
        state.planned_quantity = Some(total);

        let info = exchange.symbol_info(strategy.market, &strategy.symbol).await?;
        let quantities = split_quantity(total, &ratios(config));
        let offsets = offsets_bp(config, first_layer_offset(strategy, config));
        let missing: Vec<usize> = (0..config.layers).filter(|i| !placed.contains(i)).collect();

        info!(
            %base,
            %total,
            layers = config.layers,
            missing = missing.len(),
            "Placing iceberg layers"
        );

        let mut submitted = 0;
        let mut skipped = 0;
        for layer in missing {
            let Some(quantity) = info.tradable_quantity(quantities[layer]) else {
                warn!(layer = layer + 1, quantity = %quantities[layer], step = %info.step_size, "Layer below lot size, skipped");
                skipped += 1;
                continue;
            };
            let request = layer_request(
                strategy,
                layer,
                quantity,
                layer_price(base, offsets[layer], strategy.side),
            );
            match self
                .submit(strategy, exchange, request, Some(layer), Some(&state))
                .await
            {
                Ok(_) => submitted += 1,
                Err(e) if e.is_invalid_order() => {
                    warn!(layer = layer + 1, error = %e, "Layer rejected, skipped");
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }

            if starting && submitted == 1 {
                self.spawn_iceberg_watcher(strategy, exchange, timeout_of(config))
                    .await;
                self.protect_layered_entry(strategy, exchange, base, total)
                    .await?;
            }
        }

        state.submitted = true;
        self.store.update_strategy_state(strategy.id, &state).await?;
        if placed.is_empty() && submitted == 0 {
            warn!(skipped, "No iceberg layer could be placed");
            return self.complete(strategy).await;
        }
        Ok(TickOutcome::Submitted(submitted))
    }

    /// Every layer is out: finish once all are terminal, cancel leftovers
    /// once the timeout has passed.
    async fn follow_iceberg(
        &self,
        strategy: &Strategy,
        config: &LayeredConfig,
        exchange: &Arc<dyn ExchangeApi>,
        orders: &[Order],
    ) -> Result<TickOutcome> {
        if orders.iter().all(|o| o.status.is_terminal()) {
            return self.complete(strategy).await;
        }

        let started = orders.iter().map(|o| o.created_at).min();
        if let Some(started) = started {
            if Utc::now() - started >= config.timeout() {
                let sweep =
                    cancel_open_layers(self.store.as_ref(), exchange.as_ref(), strategy).await?;
                debug!(canceled = sweep.canceled, still_open = sweep.still_open, "Iceberg expired");
                if sweep.all_terminal() {
                    return self.complete(strategy).await;
                }
            }
        }
        Ok(TickOutcome::Waiting)
    }

    pub(crate) async fn run_slow_iceberg(
        &self,
        strategy: &Strategy,
        config: &LayeredConfig,
        exchange: &Arc<dyn ExchangeApi>,
        price: Decimal,
    ) -> Result<TickOutcome> {
        let mut state = strategy.state.clone();
        if state.current_layer >= config.layers {
            return self.complete(strategy).await;
        }

        let orders = layer_orders(self.store.orders_for_strategy(strategy.id).await?);
        if !self
            .settle_slow_layer(strategy, config, exchange, &orders, &mut state)
            .await?
        {
            return Ok(TickOutcome::Waiting);
        }

        let info = exchange.symbol_info(strategy.market, &strategy.symbol).await?;
        let shares = ratios(config);
        advance_filled_layers(&mut state, config.layers, &shares, &info);
        if state.current_layer >= config.layers {
            self.store.update_strategy_state(strategy.id, &state).await?;
            return self.complete(strategy).await;
        }

        if !trigger_hit(strategy.side, price, strategy.trigger_price) {
            if state != strategy.state {
                self.store.update_strategy_state(strategy.id, &state).await?;
            }
            return Ok(TickOutcome::NotTriggered);
        }

        let base = self.layer_base_price(strategy, exchange, price).await?;
        let starting = orders.is_empty();
        let total = self.planned_quantity(strategy, &state, exchange, base).await?;
        state.planned_quantity = Some(total);

        // Sizing is known from here on, so untradable layers can be passed over.
        let Some(quantity) = advance_filled_layers(&mut state, config.layers, &shares, &info)
        else {
            self.store.update_strategy_state(strategy.id, &state).await?;
            return self.complete(strategy).await;
        };

        let layer = state.current_layer;
        let offset = offsets_bp(config, first_layer_offset(strategy, config))[layer];
        let limit = layer_price(base, offset, strategy.side);

        info!(layer = layer + 1, %quantity, %base, %offset, %limit, "Placing slow iceberg layer");
        let request = layer_request(strategy, layer, quantity, limit);
        self.submit(strategy, exchange, request, Some(layer), Some(&state))
            .await?;

        if starting {
            self.protect_layered_entry(strategy, exchange, base, total)
                .await?;
        }
        Ok(TickOutcome::Submitted(1))
    }

    /// Deal with the open layer orders. Returns `false` while one is still
    /// working or could not be cancelled.
    async fn settle_slow_layer(
        &self,
        strategy: &Strategy,
        config: &LayeredConfig,
        exchange: &Arc<dyn ExchangeApi>,
        orders: &[Order],
        state: &mut StrategyState,
    ) -> Result<bool> {
        let now = Utc::now();
        let timeout = config.timeout();
        let mut working = false;

        for order in orders.iter().filter(|o| o.is_open()) {
            if order.age(now) < timeout {
                working = true;
                continue;
            }

            let current = order.layer == Some(state.current_layer as i32);
            match exchange
                .query_order(order.market, &order.symbol, &order.exchange_order_id)
                .await
            {
                Ok(report) => {
                    state.record_fill(&order.exchange_order_id, report.executed_qty, current);
                    let update = OrderUpdate {
                        order_id: order.id,
                        status: report.status,
                        executed_qty: report.executed_qty,
                        cumulative_quote_qty: report.cumulative_quote_qty,
                    };
                    self.store
                        .apply_order_update(&update, Some((strategy.id, &*state)))
                        .await?;
                    if report.status.is_terminal() {
                        continue;
                    }
                }
                Err(e) => {
                    warn!(order_id = order.id, error = %e, "Could not query timed-out layer order");
                }
            }

            match exchange
                .cancel_order(order.market, &order.symbol, &order.exchange_order_id)
                .await
            {
                Ok(report) => {
                    let executed = report.executed_qty.max(order.executed_qty);
                    state.record_fill(&order.exchange_order_id, executed, current);
                    let update = OrderUpdate {
                        order_id: order.id,
                        status: if report.status.is_terminal() {
                            report.status
                        } else {
                            OrderStatus::Canceled
                        },
                        executed_qty: executed,
                        cumulative_quote_qty: report
                            .cumulative_quote_qty
                            .max(order.cumulative_quote_qty),
                    };
                    self.store
                        .apply_order_update(&update, Some((strategy.id, &*state)))
                        .await?;
                    info!(order_id = order.id, layer = ?order.layer, %executed, "Timed-out layer canceled");
                }
                Err(e) => {
                    warn!(order_id = order.id, error = %e, "Failed to cancel timed-out layer order");
                    return Ok(false);
                }
            }
        }

        Ok(!working)
    }
}
