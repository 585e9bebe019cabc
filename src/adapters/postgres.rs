use crate::domain::{
    DerivativesParams, DualOrder, DualProduct, DualStrategy, Market, NewDualOrder, NewOrder,
    NewStrategy, Order, OrderUpdate, Position, PriceTick, Strategy, StrategyConfig, StrategyEvent,
    StrategyState, WithdrawalRecord, WithdrawalRule,
};
use crate::error::{EngineError, Result};
use crate::persistence::{Store, StrategyPage, StrategyPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

const ORDER_COLUMNS: &str = r#"
    id, user_id, strategy_id, market, symbol, exchange_order_id, client_order_id, side,
    order_type, position_side, quantity, price, stop_price, reduce_only, layer, status,
    executed_qty, cumulative_quote_qty, created_at, updated_at
"#;

const STRATEGY_COLUMNS: &str = r#"
    id, user_id, name, symbol, market, side, quantity, price, trigger_price, float_bp,
    derivatives, config, state, is_active, is_completed, claimed_until, created_at, updated_at
"#;

const DUAL_ORDER_COLUMNS: &str = r#"
    id, user_id, strategy_id, product_id, order_ref, amount, currency, yield_rate, status,
    purchased_at, settles_at
"#;

/// Parse a text column into one of the domain enums.
fn parse_col<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(column);
    raw.parse::<T>()
        .map_err(|e| EngineError::Internal(format!("column {column}: {e}")))
}

fn strategy_from_row(row: &PgRow) -> Result<Strategy> {
    let derivatives: Option<Value> = row.get("derivatives");
    let derivatives = match derivatives {
        Some(Value::Null) | None => None,
        Some(value) => Some(serde_json::from_value::<DerivativesParams>(value)?),
    };
    let config: Value = row.get("config");
    let state: Option<Value> = row.get("state");

    Ok(Strategy {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        symbol: row.get("symbol"),
        market: parse_col(row, "market")?,
        side: parse_col(row, "side")?,
        quantity: row.get("quantity"),
        price: row.get("price"),
        trigger_price: row.get("trigger_price"),
        float_bp: row.get("float_bp"),
        derivatives,
        config: StrategyConfig::from_json(&config)?,
        state: StrategyState::from_json(&state.unwrap_or(Value::Null))?,
        is_active: row.get("is_active"),
        is_completed: row.get("is_completed"),
        claimed_until: row.get("claimed_until"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let position_side: Option<String> = row.get("position_side");
    let position_side = position_side
        .map(|raw| raw.parse())
        .transpose()
        .map_err(|e: String| EngineError::Internal(format!("column position_side: {e}")))?;

    Ok(Order {
        id: row.get("id"),
        user_id: row.get("user_id"),
        strategy_id: row.get("strategy_id"),
        market: parse_col(row, "market")?,
        symbol: row.get("symbol"),
        exchange_order_id: row.get("exchange_order_id"),
        client_order_id: row.get("client_order_id"),
        side: parse_col(row, "side")?,
        order_type: parse_col(row, "order_type")?,
        position_side,
        quantity: row.get("quantity"),
        price: row.get("price"),
        stop_price: row.get("stop_price"),
        reduce_only: row.get("reduce_only"),
        layer: row.get("layer"),
        status: parse_col(row, "status")?,
        executed_qty: row.get("executed_qty"),
        cumulative_quote_qty: row.get("cumulative_quote_qty"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn dual_order_from_row(row: &PgRow) -> Result<DualOrder> {
    Ok(DualOrder {
        id: row.get("id"),
        user_id: row.get("user_id"),
        strategy_id: row.get("strategy_id"),
        product_id: row.get("product_id"),
        order_ref: row.get("order_ref"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        yield_rate: row.get("yield_rate"),
        status: parse_col(row, "status")?,
        purchased_at: row.get("purchased_at"),
        settles_at: row.get("settles_at"),
    })
}

fn withdrawal_rule_from_row(row: &PgRow) -> WithdrawalRule {
    WithdrawalRule {
        id: row.get("id"),
        user_id: row.get("user_id"),
        asset: row.get("asset"),
        address: row.get("address"),
        network: row.get("network"),
        amount: row.get("amount"),
        min_balance: row.get("min_balance"),
        trigger_price: row.get("trigger_price"),
        is_active: row.get("is_active"),
        auto_withdraw: row.get("auto_withdraw"),
    }
}

fn dual_strategy_from_row(row: &PgRow) -> Result<DualStrategy> {
    let ladder_steps: i32 = row.get("ladder_steps");
    Ok(DualStrategy {
        id: row.get("id"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        base_asset: row.get("base_asset"),
        quote_asset: row.get("quote_asset"),
        investment_type: parse_col(row, "investment_type")?,
        amount: row.get("amount"),
        trigger_price: row.get("trigger_price"),
        min_yield_rate: row.get("min_yield_rate"),
        ladder_steps: ladder_steps.max(0) as u32,
        amount_per_step: row.get("amount_per_step"),
        is_active: row.get("is_active"),
    })
}

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    // ==================== Strategies ====================

    #[instrument(skip(self, strategy), fields(user_id = strategy.user_id))]
    async fn create_strategy(&self, strategy: NewStrategy) -> Result<Strategy> {
        strategy.validate()?;
        let derivatives = strategy
            .derivatives
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let config = strategy.config.to_json()?;
        let state = StrategyState::default().to_json()?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO strategies (
                user_id, name, symbol, market, side, quantity, price, trigger_price,
                float_bp, derivatives, config, state, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {STRATEGY_COLUMNS}
            "#
        ))
        .bind(strategy.user_id)
        .bind(&strategy.name)
        .bind(strategy.symbol.to_ascii_uppercase())
        .bind(strategy.market.as_str())
        .bind(strategy.side.as_str())
        .bind(strategy.quantity)
        .bind(strategy.price)
        .bind(strategy.trigger_price)
        .bind(strategy.float_bp)
        .bind(derivatives)
        .bind(config)
        .bind(state)
        .bind(strategy.is_active)
        .fetch_one(&self.pool)
        .await?;

        strategy_from_row(&row)
    }

    async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>> {
        let row = sqlx::query(&format!(
            "SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(strategy_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_strategies(&self, user_id: i64, page: i64, limit: i64) -> Result<StrategyPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM strategies WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {STRATEGY_COLUMNS} FROM strategies
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .bind((page - 1).saturating_mul(limit))
        .fetch_all(&self.pool)
        .await?;

        let strategies = rows
            .iter()
            .map(strategy_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(StrategyPage {
            strategies,
            total,
            page,
            limit,
        })
    }

    async fn runnable_strategies(&self, market: Market) -> Result<Vec<Strategy>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {STRATEGY_COLUMNS} FROM strategies
            WHERE market = $1 AND is_active AND NOT is_completed
            ORDER BY id
            "#
        ))
        .bind(market.as_str())
        .fetch_all(&self.pool)
        .await?;

        // A row that no longer decodes must not stall every other strategy.
        let mut strategies = Vec::with_capacity(rows.len());
        for row in &rows {
            match strategy_from_row(row) {
                Ok(strategy) => strategies.push(strategy),
                Err(e) => {
                    let id: i64 = row.get("id");
                    warn!(strategy_id = id, error = %e, "Skipping undecodable strategy row");
                }
            }
        }
        Ok(strategies)
    }

    async fn update_strategy(&self, id: i64, patch: &StrategyPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE strategies SET
                name = COALESCE($2, name),
                is_active = COALESCE($3, is_active),
                trigger_price = CASE WHEN $4 THEN $5 ELSE trigger_price END,
                price = CASE WHEN $6 THEN $7 ELSE price END,
                float_bp = COALESCE($8, float_bp),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&patch.name)
        .bind(patch.is_active)
        .bind(patch.trigger_price.is_some())
        .bind(patch.trigger_price.flatten())
        .bind(patch.price.is_some())
        .bind(patch.price.flatten())
        .bind(patch.float_bp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn try_claim_strategy(
        &self,
        id: i64,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE strategies SET claimed_until = $2
            WHERE id = $1 AND (claimed_until IS NULL OR claimed_until <= $3)
            "#,
        )
        .bind(id)
        .bind(until)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM strategies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(EngineError::StrategyNotFound(id)),
        }
    }

    async fn release_strategy(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE strategies SET claimed_until = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_strategy_state(&self, id: i64, state: &StrategyState) -> Result<()> {
        let result =
            sqlx::query("UPDATE strategies SET state = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(state.to_json()?)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::StrategyNotFound(id));
        }
        Ok(())
    }

    async fn mark_strategy_completed(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE strategies SET is_completed = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::StrategyNotFound(id));
        }
        info!(strategy_id = id, "Strategy completed");
        Ok(())
    }

    async fn record_event(&self, event: &StrategyEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_events (strategy_id, kind, success, detail, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.strategy_id)
        .bind(&event.kind)
        .bind(event.success)
        .bind(&event.detail)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn strategy_events(&self, strategy_id: i64) -> Result<Vec<StrategyEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT strategy_id, kind, success, detail, created_at
            FROM strategy_events
            WHERE strategy_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StrategyEvent {
                strategy_id: row.get("strategy_id"),
                kind: row.get("kind"),
                success: row.get("success"),
                detail: row.get("detail"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // ==================== Orders ====================

    #[instrument(skip(self, order, state), fields(client_order_id = %order.request.client_order_id))]
    async fn record_submission(
        &self,
        order: NewOrder,
        state: Option<&StrategyState>,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        if let (Some(strategy_id), Some(state)) = (order.strategy_id, state) {
            sqlx::query("UPDATE strategies SET state = $2, updated_at = NOW() WHERE id = $1")
                .bind(strategy_id)
                .bind(state.to_json()?)
                .execute(&mut *tx)
                .await?;
        }

        let row = order.clone().into_order(0, Utc::now());
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (
                user_id, strategy_id, market, symbol, exchange_order_id, client_order_id,
                side, order_type, position_side, quantity, price, stop_price, reduce_only,
                layer, status, executed_qty, cumulative_quote_qty
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING id, created_at
            "#,
        )
        .bind(row.user_id)
        .bind(row.strategy_id)
        .bind(row.market.as_str())
        .bind(&row.symbol)
        .bind(&row.exchange_order_id)
        .bind(&row.client_order_id)
        .bind(row.side.as_str())
        .bind(row.order_type.as_str())
        .bind(row.position_side.map(|p| p.as_str()))
        .bind(row.quantity)
        .bind(row.price)
        .bind(row.stop_price)
        .bind(row.reduce_only)
        .bind(row.layer)
        .bind(row.status.as_str())
        .bind(row.executed_qty)
        .bind(row.cumulative_quote_qty)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let id: i64 = inserted.get("id");
        let created_at: DateTime<Utc> = inserted.get("created_at");
        debug!(order_id = id, "Recorded order submission");
        Ok(order.into_order(id, created_at))
    }

    async fn orders_for_strategy(&self, strategy_id: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE strategy_id = $1 ORDER BY id"
        ))
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn open_orders(&self, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status NOT IN ('filled', 'canceled', 'expired', 'rejected')
            ORDER BY id
            LIMIT $1
            "#
        ))
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    #[instrument(skip(self, state), fields(order_id = update.order_id))]
    async fn apply_order_update(
        &self,
        update: &OrderUpdate,
        state: Option<(i64, &StrategyState)>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = $2,
                executed_qty = $3,
                cumulative_quote_qty = $4,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('filled', 'canceled', 'expired', 'rejected')
            "#,
        )
        .bind(update.order_id)
        .bind(update.status.as_str())
        .bind(update.executed_qty)
        .bind(update.cumulative_quote_qty)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some((strategy_id, state)) = state {
            sqlx::query("UPDATE strategies SET state = $2, updated_at = NOW() WHERE id = $1")
                .bind(strategy_id)
                .bind(state.to_json()?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    // ==================== Market data ====================

    async fn upsert_price(&self, tick: &PriceTick) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_ticks (market, symbol, price, observed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (market, symbol) DO UPDATE SET
                price = EXCLUDED.price,
                observed_at = EXCLUDED.observed_at
            "#,
        )
        .bind(tick.market.as_str())
        .bind(&tick.symbol)
        .bind(tick.price)
        .bind(tick.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_price(&self, market: Market, symbol: &str) -> Result<Option<PriceTick>> {
        let row = sqlx::query(
            "SELECT price, observed_at FROM price_ticks WHERE market = $1 AND symbol = $2",
        )
        .bind(market.as_str())
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| PriceTick {
            symbol: symbol.to_string(),
            market,
            price: row.get("price"),
            observed_at: row.get("observed_at"),
        }))
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                user_id, symbol, position_side, position_amt, entry_price, mark_price,
                unrealized_pnl, liquidation_price, leverage, max_notional, margin_type,
                isolated_margin, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id, symbol, position_side) DO UPDATE SET
                position_amt = EXCLUDED.position_amt,
                entry_price = EXCLUDED.entry_price,
                mark_price = EXCLUDED.mark_price,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                liquidation_price = EXCLUDED.liquidation_price,
                leverage = EXCLUDED.leverage,
                max_notional = EXCLUDED.max_notional,
                margin_type = EXCLUDED.margin_type,
                isolated_margin = EXCLUDED.isolated_margin,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(position.user_id)
        .bind(&position.symbol)
        .bind(position.position_side.as_str())
        .bind(position.position_amt)
        .bind(position.entry_price)
        .bind(position.mark_price)
        .bind(position.unrealized_pnl)
        .bind(position.liquidation_price)
        .bind(position.leverage as i32)
        .bind(position.max_notional)
        .bind(position.margin_type.as_str())
        .bind(position.isolated_margin)
        .bind(position.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn positions_for_user(&self, user_id: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, symbol, position_side, position_amt, entry_price, mark_price,
                   unrealized_pnl, liquidation_price, leverage, max_notional, margin_type,
                   isolated_margin, updated_at
            FROM positions
            WHERE user_id = $1
            ORDER BY symbol, position_side
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let leverage: i32 = row.get("leverage");
                Ok(Position {
                    user_id: row.get("user_id"),
                    symbol: row.get("symbol"),
                    position_side: parse_col(row, "position_side")?,
                    position_amt: row.get("position_amt"),
                    entry_price: row.get("entry_price"),
                    mark_price: row.get("mark_price"),
                    unrealized_pnl: row.get("unrealized_pnl"),
                    liquidation_price: row.get("liquidation_price"),
                    leverage: leverage.max(0) as u32,
                    max_notional: row.get("max_notional"),
                    margin_type: parse_col(row, "margin_type")?,
                    isolated_margin: row.get("isolated_margin"),
                    updated_at: row.get("updated_at"),
                })
            })
            .collect()
    }

    // ==================== Withdrawals ====================

    async fn create_withdrawal_rule(&self, rule: WithdrawalRule) -> Result<WithdrawalRule> {
        if rule.amount <= rust_decimal::Decimal::ZERO {
            return Err(EngineError::Validation(
                "withdrawal amount must be positive".to_string(),
            ));
        }
        let row = sqlx::query(
            r#"
            INSERT INTO withdrawal_rules (
                user_id, asset, address, network, amount, min_balance, trigger_price,
                is_active, auto_withdraw
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, user_id, asset, address, network, amount, min_balance,
                      trigger_price, is_active, auto_withdraw
            "#,
        )
        .bind(rule.user_id)
        .bind(rule.asset.to_ascii_uppercase())
        .bind(&rule.address)
        .bind(&rule.network)
        .bind(rule.amount)
        .bind(rule.min_balance)
        .bind(rule.trigger_price)
        .bind(rule.is_active)
        .bind(rule.auto_withdraw)
        .fetch_one(&self.pool)
        .await?;

        Ok(withdrawal_rule_from_row(&row))
    }

    async fn auto_withdrawal_rules(&self) -> Result<Vec<WithdrawalRule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, asset, address, network, amount, min_balance,
                   trigger_price, is_active, auto_withdraw
            FROM withdrawal_rules
            WHERE is_active AND auto_withdraw
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(withdrawal_rule_from_row).collect())
    }

    async fn record_withdrawal(&self, record: &WithdrawalRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawal_history (
                user_id, rule_id, asset, amount, address, network, tx_id, status, applied_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.user_id)
        .bind(record.rule_id)
        .bind(&record.asset)
        .bind(record.amount)
        .bind(&record.address)
        .bind(&record.network)
        .bind(&record.tx_id)
        .bind(&record.status)
        .bind(record.applied_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn withdrawal_history(&self, user_id: i64) -> Result<Vec<WithdrawalRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, rule_id, asset, amount, address, network, tx_id, status, applied_at
            FROM withdrawal_history
            WHERE user_id = $1
            ORDER BY applied_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| WithdrawalRecord {
                user_id: row.get("user_id"),
                rule_id: row.get("rule_id"),
                asset: row.get("asset"),
                amount: row.get("amount"),
                address: row.get("address"),
                network: row.get("network"),
                tx_id: row.get("tx_id"),
                status: row.get("status"),
                applied_at: row.get("applied_at"),
            })
            .collect())
    }

    // ==================== Dual investment ====================

    async fn upsert_dual_product(&self, product: &DualProduct) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dual_products (
                product_id, base_asset, quote_asset, min_amount, max_amount, duration_days,
                yield_rate, is_active, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (product_id) DO UPDATE SET
                base_asset = EXCLUDED.base_asset,
                quote_asset = EXCLUDED.quote_asset,
                min_amount = EXCLUDED.min_amount,
                max_amount = EXCLUDED.max_amount,
                duration_days = EXCLUDED.duration_days,
                yield_rate = EXCLUDED.yield_rate,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(&product.product_id)
        .bind(&product.base_asset)
        .bind(&product.quote_asset)
        .bind(product.min_amount)
        .bind(product.max_amount)
        .bind(product.duration_days)
        .bind(product.yield_rate)
        .bind(product.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dual_product(&self, product_id: &str) -> Result<Option<DualProduct>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, base_asset, quote_asset, min_amount, max_amount,
                   duration_days, yield_rate, is_active
            FROM dual_products
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DualProduct {
            product_id: row.get("product_id"),
            base_asset: row.get("base_asset"),
            quote_asset: row.get("quote_asset"),
            min_amount: row.get("min_amount"),
            max_amount: row.get("max_amount"),
            duration_days: row.get("duration_days"),
            yield_rate: row.get("yield_rate"),
            is_active: row.get("is_active"),
        }))
    }

    async fn create_dual_strategy(&self, strategy: DualStrategy) -> Result<DualStrategy> {
        let row = sqlx::query(
            r#"
            INSERT INTO dual_strategies (
                user_id, product_id, base_asset, quote_asset, investment_type, amount,
                trigger_price, min_yield_rate, ladder_steps, amount_per_step, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, user_id, product_id, base_asset, quote_asset, investment_type,
                      amount, trigger_price, min_yield_rate, ladder_steps, amount_per_step,
                      is_active
            "#,
        )
        .bind(strategy.user_id)
        .bind(&strategy.product_id)
        .bind(strategy.base_asset.to_ascii_uppercase())
        .bind(strategy.quote_asset.to_ascii_uppercase())
        .bind(strategy.investment_type.as_str())
        .bind(strategy.amount)
        .bind(strategy.trigger_price)
        .bind(strategy.min_yield_rate)
        .bind(strategy.ladder_steps as i32)
        .bind(strategy.amount_per_step)
        .bind(strategy.is_active)
        .fetch_one(&self.pool)
        .await?;

        dual_strategy_from_row(&row)
    }

    async fn active_dual_strategies(&self) -> Result<Vec<DualStrategy>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, base_asset, quote_asset, investment_type,
                   amount, trigger_price, min_yield_rate, ladder_steps, amount_per_step,
                   is_active
            FROM dual_strategies
            WHERE is_active
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dual_strategy_from_row).collect()
    }

    async fn dual_orders_for_strategy(&self, strategy_id: i64) -> Result<Vec<DualOrder>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DUAL_ORDER_COLUMNS} FROM dual_orders
            WHERE strategy_id = $1
            ORDER BY purchased_at, id
            "#
        ))
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dual_order_from_row).collect()
    }

    async fn insert_dual_order(&self, order: NewDualOrder) -> Result<DualOrder> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO dual_orders (
                user_id, strategy_id, product_id, order_ref, amount, currency, yield_rate,
                status, purchased_at, settles_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PURCHASED', $8, $9)
            RETURNING {DUAL_ORDER_COLUMNS}
            "#
        ))
        .bind(order.user_id)
        .bind(order.strategy_id)
        .bind(&order.product_id)
        .bind(&order.order_ref)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.yield_rate)
        .bind(order.purchased_at)
        .bind(order.settles_at)
        .fetch_one(&self.pool)
        .await?;

        dual_order_from_row(&row)
    }

    async fn due_dual_orders(&self, now: DateTime<Utc>) -> Result<Vec<DualOrder>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DUAL_ORDER_COLUMNS} FROM dual_orders
            WHERE status = 'PURCHASED' AND settles_at <= $1
            ORDER BY settles_at, id
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dual_order_from_row).collect()
    }

    async fn settle_dual_order(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dual_orders SET status = 'SETTLED', settled_at = $2
            WHERE id = $1 AND status = 'PURCHASED'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
