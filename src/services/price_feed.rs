//! Latest spot prices for a fixed symbol list.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Market, PriceTick};
use crate::error::Result;
use crate::exchange::ExchangeProvider;
use crate::persistence::Store;

pub struct PriceFeed {
    store: Arc<dyn Store>,
    exchanges: Arc<dyn ExchangeProvider>,
    symbols: Vec<String>,
}

impl PriceFeed {
    pub fn new(
        store: Arc<dyn Store>,
        exchanges: Arc<dyn ExchangeProvider>,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            store,
            exchanges,
            symbols,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Fetch one symbol through the public gateway and store it.
    pub async fn refresh(&self, symbol: &str) -> Result<PriceTick> {
        let price = self.exchanges.public().price(Market::Spot, symbol).await?;
        let tick = PriceTick {
            symbol: symbol.to_string(),
            market: Market::Spot,
            price,
            observed_at: Utc::now(),
        };
        self.store.upsert_price(&tick).await?;
        debug!(symbol, %price, "Price updated");
        Ok(tick)
    }
}
