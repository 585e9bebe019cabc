//! USDT-margined futures: account setup, sizing and the simple family.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::warn;

use super::engine::{trigger_hit, StrategyEngine, TickOutcome};
use crate::domain::{DerivativesParams, Market, OrderRequest, OrderSide, Strategy};
use crate::error::{EngineError, Result};
use crate::exchange::ExchangeApi;

/// Base quantity bought with `margin × leverage` at `price`.
pub fn position_quantity(params: &DerivativesParams, price: Decimal) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(EngineError::InvalidState(format!(
            "cannot size a position at price {price}"
        )));
    }
    Ok(params.notional() / price)
}

/// Longs bid below the market, shorts offer above it.
pub fn floated_price(price: Decimal, float_bp: Decimal, side: OrderSide) -> Decimal {
    let shift = float_bp / dec!(10000);
    match side {
        OrderSide::Buy => price * (Decimal::ONE - shift),
        OrderSide::Sell => price * (Decimal::ONE + shift),
    }
}

pub(crate) fn derivatives(strategy: &Strategy) -> Result<&DerivativesParams> {
    strategy.derivatives.as_ref().ok_or_else(|| {
        EngineError::InvalidState(format!(
            "futures strategy {} has no leverage parameters",
            strategy.id
        ))
    })
}

impl StrategyEngine {
    /// Push leverage and margin mode before placing orders. Failures are
    /// logged; the order is still attempted.
    pub(crate) async fn prepare_futures_account(
        &self,
        strategy: &Strategy,
        params: &DerivativesParams,
        exchange: &Arc<dyn ExchangeApi>,
    ) {
        if let Err(e) = exchange.set_leverage(&strategy.symbol, params.leverage).await {
            warn!(symbol = %strategy.symbol, leverage = params.leverage, error = %e, "Failed to set leverage");
        }
        if let Err(e) = exchange
            .set_margin_type(&strategy.symbol, params.margin_type)
            .await
        {
            warn!(symbol = %strategy.symbol, margin_type = params.margin_type.as_str(), error = %e, "Failed to set margin type");
        }
    }

    pub(crate) async fn run_futures_simple(
        &self,
        strategy: &Strategy,
        exchange: &Arc<dyn ExchangeApi>,
        price: Decimal,
    ) -> Result<TickOutcome> {
        let params = derivatives(strategy)?;
        if !trigger_hit(strategy.side, price, strategy.trigger_price) {
            return Ok(TickOutcome::NotTriggered);
        }

        self.prepare_futures_account(strategy, params, exchange).await;

        let quantity = position_quantity(params, price)?;
        let limit = floated_price(price, strategy.float_bp, strategy.side);
        let request = OrderRequest::limit(
            Market::Futures,
            &strategy.symbol,
            strategy.side,
            quantity,
            limit,
        )
        .with_position_side(strategy.side.position_side());

        let order = self.submit(strategy, exchange, request, None, None).await?;
        let entry = order.price.unwrap_or(limit);
        self.schedule_protective_orders(strategy, params, exchange, entry, order.quantity)
            .await;
        self.complete(strategy).await
    }
}
