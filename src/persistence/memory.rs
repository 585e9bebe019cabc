//! In-process store for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::{
    DualOrder, DualOrderStatus, DualProduct, DualStrategy, Market, NewDualOrder, NewOrder,
    NewStrategy, Order, OrderUpdate, Position, PositionSide, PriceTick, Strategy, StrategyEvent,
    StrategyState, WithdrawalRecord, WithdrawalRule,
};
use crate::error::{EngineError, Result};

use super::store::{Store, StrategyPage, StrategyPatch};

#[derive(Default)]
struct Tables {
    next_id: i64,
    strategies: Vec<Strategy>,
    events: Vec<StrategyEvent>,
    orders: Vec<Order>,
    prices: HashMap<(Market, String), PriceTick>,
    positions: HashMap<(i64, String, PositionSide), Position>,
    withdrawal_rules: Vec<WithdrawalRule>,
    withdrawals: Vec<WithdrawalRecord>,
    dual_products: HashMap<String, DualProduct>,
    dual_strategies: Vec<DualStrategy>,
    dual_orders: Vec<DualOrder>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn strategy_mut(&mut self, id: i64) -> Result<&mut Strategy> {
        self.strategies
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(EngineError::StrategyNotFound(id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every order row, in insertion order
    pub fn all_orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    /// Overwrite an order row, bypassing the terminal guard.
    pub fn put_order(&self, order: Order) {
        let mut tables = self.lock();
        if let Some(existing) = tables.orders.iter_mut().find(|o| o.id == order.id) {
            *existing = order;
        } else {
            tables.orders.push(order);
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.lock();
        f.debug_struct("MemoryStore")
            .field("strategies", &tables.strategies.len())
            .field("orders", &tables.orders.len())
            .finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_strategy(&self, strategy: NewStrategy) -> Result<Strategy> {
        strategy.validate()?;
        let mut tables = self.lock();
        let id = tables.next_id();
        let row = strategy.into_strategy(id, Utc::now());
        tables.strategies.push(row.clone());
        Ok(row)
    }

    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>> {
        Ok(self.lock().strategies.iter().find(|s| s.id == id).cloned())
    }

    async fn list_strategies(&self, user_id: i64, page: i64, limit: i64) -> Result<StrategyPage> {
        let (page, limit) = (page.max(1), limit.clamp(1, 100));
        let tables = self.lock();
        let mut owned: Vec<&Strategy> = tables
            .strategies
            .iter()
            .filter(|s| s.user_id == user_id)
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = owned.len() as i64;
        let strategies = owned
            .into_iter()
            .skip((page - 1).saturating_mul(limit) as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(StrategyPage {
            strategies,
            total,
            page,
            limit,
        })
    }

    async fn runnable_strategies(&self, market: Market) -> Result<Vec<Strategy>> {
        Ok(self
            .lock()
            .strategies
            .iter()
            .filter(|s| s.market == market && s.is_runnable())
            .cloned()
            .collect())
    }

    async fn update_strategy(&self, id: i64, patch: &StrategyPatch) -> Result<bool> {
        let mut tables = self.lock();
        let Some(strategy) = tables.strategies.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };
        if patch.is_empty() {
            return Ok(false);
        }
        patch.apply(strategy);
        strategy.updated_at = Utc::now();
        Ok(true)
    }

    async fn try_claim_strategy(
        &self,
        id: i64,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let strategy = tables.strategy_mut(id)?;
        match strategy.claimed_until {
            Some(held) if held > now => Ok(false),
            _ => {
                strategy.claimed_until = Some(until);
                Ok(true)
            }
        }
    }

    async fn release_strategy(&self, id: i64) -> Result<()> {
        let mut tables = self.lock();
        tables.strategy_mut(id)?.claimed_until = None;
        Ok(())
    }

    async fn update_strategy_state(&self, id: i64, state: &StrategyState) -> Result<()> {
        let mut tables = self.lock();
        let strategy = tables.strategy_mut(id)?;
        strategy.state = state.clone();
        strategy.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_strategy_completed(&self, id: i64) -> Result<()> {
        let mut tables = self.lock();
        let strategy = tables.strategy_mut(id)?;
        strategy.is_completed = true;
        strategy.updated_at = Utc::now();
        Ok(())
    }

    async fn record_event(&self, event: &StrategyEvent) -> Result<()> {
        self.lock().events.push(event.clone());
        Ok(())
    }

    async fn strategy_events(&self, strategy_id: i64) -> Result<Vec<StrategyEvent>> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| e.strategy_id == strategy_id)
            .cloned()
            .collect())
    }

    async fn record_submission(
        &self,
        order: NewOrder,
        state: Option<&StrategyState>,
    ) -> Result<Order> {
        let mut tables = self.lock();
        if let (Some(state), Some(strategy_id)) = (state, order.strategy_id) {
            let strategy = tables.strategy_mut(strategy_id)?;
            strategy.state = state.clone();
            strategy.updated_at = Utc::now();
        }
        let id = tables.next_id();
        let row = order.into_order(id, Utc::now());
        tables.orders.push(row.clone());
        Ok(row)
    }

    async fn orders_for_strategy(&self, strategy_id: i64) -> Result<Vec<Order>> {
        Ok(self
            .lock()
            .orders
            .iter()
            .filter(|o| o.strategy_id == Some(strategy_id))
            .cloned()
            .collect())
    }

    async fn open_orders(&self, limit: i64) -> Result<Vec<Order>> {
        Ok(self
            .lock()
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn apply_order_update(
        &self,
        update: &OrderUpdate,
        state: Option<(i64, &StrategyState)>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let Some(order) = tables
            .orders
            .iter_mut()
            .find(|o| o.id == update.order_id && !o.status.is_terminal())
        else {
            return Ok(false);
        };
        order.status = update.status;
        order.executed_qty = update.executed_qty;
        order.cumulative_quote_qty = update.cumulative_quote_qty;
        order.updated_at = Utc::now();

        if let Some((strategy_id, state)) = state {
            let strategy = tables.strategy_mut(strategy_id)?;
            strategy.state = state.clone();
            strategy.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn upsert_price(&self, tick: &PriceTick) -> Result<()> {
        self.lock()
            .prices
            .insert((tick.market, tick.symbol.clone()), tick.clone());
        Ok(())
    }

    async fn latest_price(&self, market: Market, symbol: &str) -> Result<Option<PriceTick>> {
        Ok(self
            .lock()
            .prices
            .get(&(market, symbol.to_string()))
            .cloned())
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        self.lock().positions.insert(
            (
                position.user_id,
                position.symbol.clone(),
                position.position_side,
            ),
            position.clone(),
        );
        Ok(())
    }

    async fn positions_for_user(&self, user_id: i64) -> Result<Vec<Position>> {
        let mut positions: Vec<Position> = self
            .lock()
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn create_withdrawal_rule(&self, rule: WithdrawalRule) -> Result<WithdrawalRule> {
        let mut tables = self.lock();
        let id = tables.next_id();
        let rule = WithdrawalRule { id, ..rule };
        tables.withdrawal_rules.push(rule.clone());
        Ok(rule)
    }

    async fn auto_withdrawal_rules(&self) -> Result<Vec<WithdrawalRule>> {
        Ok(self
            .lock()
            .withdrawal_rules
            .iter()
            .filter(|r| r.is_active && r.auto_withdraw)
            .cloned()
            .collect())
    }

    async fn record_withdrawal(&self, record: &WithdrawalRecord) -> Result<()> {
        self.lock().withdrawals.push(record.clone());
        Ok(())
    }

    async fn withdrawal_history(&self, user_id: i64) -> Result<Vec<WithdrawalRecord>> {
        Ok(self
            .lock()
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn upsert_dual_product(&self, product: &DualProduct) -> Result<()> {
        self.lock()
            .dual_products
            .insert(product.product_id.clone(), product.clone());
        Ok(())
    }

    async fn dual_product(&self, product_id: &str) -> Result<Option<DualProduct>> {
        Ok(self.lock().dual_products.get(product_id).cloned())
    }

    async fn create_dual_strategy(&self, strategy: DualStrategy) -> Result<DualStrategy> {
        let mut tables = self.lock();
        let id = tables.next_id();
        let strategy = DualStrategy { id, ..strategy };
        tables.dual_strategies.push(strategy.clone());
        Ok(strategy)
    }

    async fn active_dual_strategies(&self) -> Result<Vec<DualStrategy>> {
        Ok(self
            .lock()
            .dual_strategies
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn dual_orders_for_strategy(&self, strategy_id: i64) -> Result<Vec<DualOrder>> {
        let mut orders: Vec<DualOrder> = self
            .lock()
            .dual_orders
            .iter()
            .filter(|o| o.strategy_id == Some(strategy_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.purchased_at.cmp(&b.purchased_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn insert_dual_order(&self, order: NewDualOrder) -> Result<DualOrder> {
        let mut tables = self.lock();
        let id = tables.next_id();
        let row = DualOrder {
            id,
            user_id: order.user_id,
            strategy_id: Some(order.strategy_id),
            product_id: order.product_id,
            order_ref: order.order_ref,
            amount: order.amount,
            currency: order.currency,
            yield_rate: order.yield_rate,
            status: DualOrderStatus::Purchased,
            purchased_at: order.purchased_at,
            settles_at: order.settles_at,
        };
        tables.dual_orders.push(row.clone());
        Ok(row)
    }

    async fn due_dual_orders(&self, now: DateTime<Utc>) -> Result<Vec<DualOrder>> {
        Ok(self
            .lock()
            .dual_orders
            .iter()
            .filter(|o| o.status == DualOrderStatus::Purchased && o.settles_at <= now)
            .cloned()
            .collect())
    }

    async fn settle_dual_order(&self, id: i64, _now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.lock();
        match tables
            .dual_orders
            .iter_mut()
            .find(|o| o.id == id && o.status == DualOrderStatus::Purchased)
        {
            Some(order) => {
                order.status = DualOrderStatus::Settled;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
