//! Stop-loss and take-profit orders placed shortly after a futures entry.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::engine::StrategyEngine;
use crate::coordination::ShutdownToken;
use crate::domain::{
    DerivativesParams, NewOrder, OrderRequest, OrderSide, OrderType, Strategy, StrategyEvent,
};
use crate::exchange::ExchangeApi;
use crate::persistence::Store;

/// Reduce-only exits for a position opened on `side` at `entry`.
///
/// A zero basis-point setting skips that leg.
pub fn protective_orders(
    symbol: &str,
    side: OrderSide,
    params: &DerivativesParams,
    entry: Decimal,
    quantity: Decimal,
) -> Vec<OrderRequest> {
    let bp = |value: u32| Decimal::from(value) / dec!(10000);
    let exit_side = side.opposite();
    let position_side = side.position_side();
    let mut orders = Vec::with_capacity(2);

    if params.stop_loss_bp > 0 {
        let stop = match side {
            OrderSide::Buy => entry * (Decimal::ONE - bp(params.stop_loss_bp)),
            OrderSide::Sell => entry * (Decimal::ONE + bp(params.stop_loss_bp)),
        };
        orders.push(OrderRequest::protective(
            symbol,
            exit_side,
            OrderType::StopMarket,
            quantity,
            stop,
            position_side,
        ));
    }
    if params.take_profit_bp > 0 {
        let target = match side {
            OrderSide::Buy => entry * (Decimal::ONE + bp(params.take_profit_bp)),
            OrderSide::Sell => entry * (Decimal::ONE - bp(params.take_profit_bp)),
        };
        orders.push(OrderRequest::protective(
            symbol,
            exit_side,
            OrderType::TakeProfitMarket,
            quantity,
            target,
            position_side,
        ));
    }
    orders
}

fn event_kind(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::StopMarket => "stop_loss",
        _ => "take_profit",
    }
}

impl StrategyEngine {
    /// Place exits in the background after the configured delay. Nothing is
    /// retried; each outcome is recorded as a strategy event.
    pub(crate) async fn schedule_protective_orders(
        &self,
        strategy: &Strategy,
        params: &DerivativesParams,
        exchange: &Arc<dyn ExchangeApi>,
        entry: Decimal,
        quantity: Decimal,
    ) {
        let requests = protective_orders(&strategy.symbol, strategy.side, params, entry, quantity);
        if requests.is_empty() {
            return;
        }

        let task = place_protective_orders(
            Arc::clone(&self.store),
            Arc::clone(exchange),
            strategy.user_id,
            strategy.id,
            requests,
            self.protective_delay,
            self.tasks.token(),
        );
        self.tasks.spawn("protective-orders", task).await;
    }
}

async fn place_protective_orders(
    store: Arc<dyn Store>,
    exchange: Arc<dyn ExchangeApi>,
    user_id: i64,
    strategy_id: i64,
    requests: Vec<OrderRequest>,
    delay: Duration,
    mut token: ShutdownToken,
) {
    if !token.sleep(delay).await {
        return;
    }

    for request in requests {
        let kind = event_kind(request.order_type);
        let stop_price = request.stop_price.unwrap_or_default();

        let event = match exchange.place_order(&request).await {
            Ok(report) => {
                info!(strategy_id, kind, %stop_price, exchange_order_id = %report.exchange_order_id, "Protective order placed");
                let detail = format!(
                    "{} {} at {} (order {})",
                    request.order_type.as_str(),
                    request.quantity,
                    stop_price,
                    report.exchange_order_id
                );
                let order = NewOrder::new(user_id, Some(strategy_id), None, request, report);
                if let Err(e) = store.record_submission(order, None).await {
                    warn!(strategy_id, kind, error = %e, "Failed to persist protective order");
                }
                StrategyEvent::new(strategy_id, kind, true, detail)
            }
            Err(e) => {
                warn!(strategy_id, kind, %stop_price, error = %e, "Protective order rejected");
                StrategyEvent::new(strategy_id, kind, false, e.to_string())
            }
        };

        if let Err(e) = store.record_event(&event).await {
            warn!(strategy_id, kind, error = %e, "Failed to record strategy event");
        }
    }
}
