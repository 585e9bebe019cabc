use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    DualOrder, DualProduct, DualStrategy, Market, NewDualOrder, NewOrder, NewStrategy, Order,
    OrderUpdate, Position, PriceTick, Strategy, StrategyEvent, StrategyState, WithdrawalRecord,
    WithdrawalRule,
};
use crate::error::Result;

/// Page of strategies plus the total row count for the user
#[derive(Debug, Clone)]
pub struct StrategyPage {
    pub strategies: Vec<Strategy>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Fields of a strategy that may be changed after creation.
///
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyPatch {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub trigger_price: Option<Option<Decimal>>,
    pub price: Option<Option<Decimal>>,
    pub float_bp: Option<Decimal>,
}

impl StrategyPatch {
    pub fn is_empty(&self) -> bool {
        *self == StrategyPatch::default()
    }

    pub fn apply(&self, strategy: &mut Strategy) {
        if let Some(name) = &self.name {
            strategy.name = name.clone();
        }
        if let Some(active) = self.is_active {
            strategy.is_active = active;
        }
        if let Some(trigger) = self.trigger_price {
            strategy.trigger_price = trigger;
        }
        if let Some(price) = self.price {
            strategy.price = price;
        }
        if let Some(float_bp) = self.float_bp {
            strategy.float_bp = float_bp;
        }
    }
}

/// Persistence used by the engine and the scheduler.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- strategies ----

    /// Validate and insert a strategy.
    async fn create_strategy(&self, strategy: NewStrategy) -> Result<Strategy>;

    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>>;

    /// Newest first; `page` starts at 1.
    async fn list_strategies(&self, user_id: i64, page: i64, limit: i64) -> Result<StrategyPage>;

    /// Active, not completed strategies on `market`
    async fn runnable_strategies(&self, market: Market) -> Result<Vec<Strategy>>;

    async fn update_strategy(&self, id: i64, patch: &StrategyPatch) -> Result<bool>;

    /// Set `claimed_until` if the strategy is unclaimed or its lease expired.
    async fn try_claim_strategy(
        &self,
        id: i64,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn release_strategy(&self, id: i64) -> Result<()>;

    async fn update_strategy_state(&self, id: i64, state: &StrategyState) -> Result<()>;

    async fn mark_strategy_completed(&self, id: i64) -> Result<()>;

    async fn record_event(&self, event: &StrategyEvent) -> Result<()>;

    async fn strategy_events(&self, strategy_id: i64) -> Result<Vec<StrategyEvent>>;

    // ---- orders ----

    /// Insert an order row and, in the same transaction, the state of the
    /// strategy it belongs to.
    async fn record_submission(
        &self,
        order: NewOrder,
        state: Option<&StrategyState>,
    ) -> Result<Order>;

    async fn orders_for_strategy(&self, strategy_id: i64) -> Result<Vec<Order>>;

    /// Oldest non-terminal orders first
    async fn open_orders(&self, limit: i64) -> Result<Vec<Order>>;

    /// Apply reconciled fields unless the row is already terminal, together
    /// with the owning strategy's state when given. Returns whether the row
    /// changed.
    async fn apply_order_update(
        &self,
        update: &OrderUpdate,
        state: Option<(i64, &StrategyState)>,
    ) -> Result<bool>;

    // ---- market data and positions ----

    async fn upsert_price(&self, tick: &PriceTick) -> Result<()>;

    async fn latest_price(&self, market: Market, symbol: &str) -> Result<Option<PriceTick>>;

    /// Overwrite the row keyed by (user, symbol, position side).
    async fn upsert_position(&self, position: &Position) -> Result<()>;

    async fn positions_for_user(&self, user_id: i64) -> Result<Vec<Position>>;

    // ---- withdrawals ----

    async fn create_withdrawal_rule(&self, rule: WithdrawalRule) -> Result<WithdrawalRule>;

    /// Active rules with automatic withdrawal enabled
    async fn auto_withdrawal_rules(&self) -> Result<Vec<WithdrawalRule>>;

    async fn record_withdrawal(&self, record: &WithdrawalRecord) -> Result<()>;

    async fn withdrawal_history(&self, user_id: i64) -> Result<Vec<WithdrawalRecord>>;

    // ---- recurring products ----

    async fn upsert_dual_product(&self, product: &DualProduct) -> Result<()>;

    async fn dual_product(&self, product_id: &str) -> Result<Option<DualProduct>>;

    async fn create_dual_strategy(&self, strategy: DualStrategy) -> Result<DualStrategy>;

    async fn active_dual_strategies(&self) -> Result<Vec<DualStrategy>>;

    /// Oldest purchase first
    async fn dual_orders_for_strategy(&self, strategy_id: i64) -> Result<Vec<DualOrder>>;

    async fn insert_dual_order(&self, order: NewDualOrder) -> Result<DualOrder>;

    /// Purchased orders whose settlement time is at or before `now`
    async fn due_dual_orders(&self, now: DateTime<Utc>) -> Result<Vec<DualOrder>>;

    async fn settle_dual_order(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;
}
