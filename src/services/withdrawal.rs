//! Automatic withdrawals driven by user rules.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::domain::{Market, WithdrawRequest, WithdrawalRecord, WithdrawalRule};
use crate::error::Result;
use crate::exchange::ExchangeProvider;
use crate::persistence::Store;

/// Status recorded for a withdrawal the exchange has accepted
pub const WITHDRAWAL_PENDING: &str = "PENDING";

/// What evaluating one rule did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    /// Free balance would drop below the rule's floor
    InsufficientBalance,
    /// `<ASSET>USDT` is below the trigger price
    BelowTrigger,
    Withdrawn { tx_id: String },
}

/// Whether `free` covers the withdrawal and still leaves `min_balance`.
pub fn balance_allows(rule: &WithdrawalRule, free: Decimal) -> bool {
    free >= rule.min_balance + rule.amount
}

/// A trigger of zero or less means "no trigger".
pub fn trigger_allows(rule: &WithdrawalRule, price: Option<Decimal>) -> bool {
    match rule.trigger_price.filter(|t| *t > Decimal::ZERO) {
        None => true,
        Some(trigger) => price.map(|p| p >= trigger).unwrap_or(false),
    }
}

pub struct WithdrawalService {
    store: Arc<dyn Store>,
    exchanges: Arc<dyn ExchangeProvider>,
}

impl WithdrawalService {
    pub fn new(store: Arc<dyn Store>, exchanges: Arc<dyn ExchangeProvider>) -> Self {
        Self { store, exchanges }
    }

    pub async fn rules(&self) -> Result<Vec<WithdrawalRule>> {
        self.store.auto_withdrawal_rules().await
    }

    #[instrument(skip(self, rule), fields(rule_id = rule.id, user_id = rule.user_id, asset = %rule.asset))]
    pub async fn evaluate(&self, rule: &WithdrawalRule) -> Result<WithdrawalOutcome> {
        let exchange = self.exchanges.for_user(rule.user_id).await?;

        let account = exchange.account(Market::Spot).await?;
        let free = account.free(&rule.asset);
        if !balance_allows(rule, free) {
            debug!(%free, min_balance = %rule.min_balance, amount = %rule.amount, "Balance below withdrawal floor");
            return Ok(WithdrawalOutcome::InsufficientBalance);
        }

        let needs_price = rule.trigger_price.is_some_and(|t| t > Decimal::ZERO);
        let price = if needs_price {
            Some(exchange.price(Market::Spot, &rule.price_symbol()).await?)
        } else {
            None
        };
        if !trigger_allows(rule, price) {
            debug!(price = ?price, trigger = ?rule.trigger_price, "Withdrawal trigger not reached");
            return Ok(WithdrawalOutcome::BelowTrigger);
        }

        let request = WithdrawRequest::from(rule);
        let receipt = exchange.withdraw(&request).await?;

        let record = WithdrawalRecord {
            user_id: rule.user_id,
            rule_id: Some(rule.id),
            asset: request.asset.clone(),
            amount: request.amount,
            address: request.address.clone(),
            network: request.network.clone(),
            tx_id: receipt.id.clone(),
            status: WITHDRAWAL_PENDING.to_string(),
            applied_at: Utc::now(),
        };
        self.store.record_withdrawal(&record).await?;

        info!(amount = %request.amount, tx_id = %receipt.id, "Withdrawal submitted");
        Ok(WithdrawalOutcome::Withdrawn { tx_id: receipt.id })
    }
}
