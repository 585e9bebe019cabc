use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{
    AccountSnapshot, BookTop, MarginType, Market, OrderReport, OrderRequest, Position, SymbolInfo,
    WithdrawReceipt, WithdrawRequest,
};
use crate::error::{EngineError, Result};

use super::diagnosis::DiagnosisReport;

fn unsupported(feature: &str) -> EngineError {
    EngineError::Validation(format!("{} is not supported by this gateway", feature))
}

/// Everything the engine and scheduler need from the exchange.
///
/// One instance is bound to one user's credentials (or none, for public
/// market data). Implementations never retry; callers decide on the next
/// tick.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// User the gateway signs for, `None` for the public gateway
    fn user_id(&self) -> Option<i64>;

    async fn price(&self, market: Market, symbol: &str) -> Result<Decimal>;

    async fn depth(&self, market: Market, symbol: &str) -> Result<BookTop>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReport>;

    async fn cancel_order(
        &self,
        market: Market,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderReport>;

    async fn query_order(
        &self,
        market: Market,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderReport>;

    async fn account(&self, market: Market) -> Result<AccountSnapshot>;

    /// Non-zero futures positions
    async fn positions(&self) -> Result<Vec<Position>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<()>;

    async fn symbol_info(&self, market: Market, symbol: &str) -> Result<SymbolInfo>;

    /// Exchange clock in Unix milliseconds
    async fn server_time(&self, market: Market) -> Result<i64>;

    async fn withdraw(&self, _request: &WithdrawRequest) -> Result<WithdrawReceipt> {
        Err(unsupported("withdraw"))
    }

    async fn diagnose(&self) -> Result<DiagnosisReport> {
        Err(unsupported("diagnose"))
    }

    /// Spot account check followed by a futures account check
    async fn validate_credentials(&self) -> Result<()> {
        Err(unsupported("validate_credentials"))
    }
}

/// Top of book with the fallback used when one side is empty.
///
/// Buy orders rest against the bid and sell orders against the ask; an
/// empty side falls back to `last × 0.999` (bid) or `last × 1.001` (ask).
pub fn reference_price(book: &BookTop, last: Decimal, buy: bool) -> Decimal {
    if buy {
        book.best_bid
            .filter(|p| !p.is_zero())
            .unwrap_or(last * Decimal::new(999, 3))
    } else {
        book.best_ask
            .filter(|p| !p.is_zero())
            .unwrap_or(last * Decimal::new(1001, 3))
    }
}
