//! Futures position snapshots, refreshed for every user with keys.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::exchange::ExchangeProvider;
use crate::persistence::Store;

pub struct PositionSync {
    store: Arc<dyn Store>,
    exchanges: Arc<dyn ExchangeProvider>,
}

impl PositionSync {
    pub fn new(store: Arc<dyn Store>, exchanges: Arc<dyn ExchangeProvider>) -> Self {
        Self { store, exchanges }
    }

    pub async fn users(&self) -> Result<Vec<i64>> {
        self.exchanges.users_with_credentials().await
    }

    /// Overwrite the stored snapshot of each non-zero position. Returns
    /// how many were written.
    #[instrument(skip(self))]
    pub async fn refresh_user(&self, user_id: i64) -> Result<usize> {
        let exchange = self.exchanges.for_user(user_id).await?;
        let positions = exchange.positions().await?;

        let mut written = 0;
        for mut position in positions.into_iter().filter(|p| !p.is_flat()) {
            position.user_id = user_id;
            self.store.upsert_position(&position).await?;
            written += 1;
        }
        debug!(positions = written, "Positions refreshed");
        Ok(written)
    }
}
