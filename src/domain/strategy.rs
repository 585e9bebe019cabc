//! Persisted strategy definitions.
//!
//! `config` is a tagged union with one struct per family, wrapped in a
//! versioned envelope. It is validated when a strategy is created or loaded,
//! never on each tick. `state` is owned by the execution engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::{Market, OrderSide};
use crate::error::{EngineError, Result};

/// Current envelope version for `config` and `state`
pub const CONFIG_VERSION: u32 = 1;

pub const MIN_LAYERS: usize = 5;
pub const MAX_LAYERS: usize = 10;
pub const MAX_STRATEGY_LEVERAGE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFamily {
    Simple,
    Iceberg,
    SlowIceberg,
    Grid,
    RecurringBuy,
}

impl StrategyFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyFamily::Simple => "simple",
            StrategyFamily::Iceberg => "iceberg",
            StrategyFamily::SlowIceberg => "slow_iceberg",
            StrategyFamily::Grid => "grid",
            StrategyFamily::RecurringBuy => "recurring_buy",
        }
    }

    pub fn is_layered(&self) -> bool {
        matches!(self, StrategyFamily::Iceberg | StrategyFamily::SlowIceberg)
    }

    pub fn supports(&self, market: Market) -> bool {
        match market {
            Market::Spot => true,
            Market::Futures => matches!(
                self,
                StrategyFamily::Simple | StrategyFamily::Iceberg | StrategyFamily::SlowIceberg
            ),
        }
    }
}

impl std::fmt::Display for StrategyFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Futures margin mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    Isolated,
    #[serde(alias = "cross")]
    Crossed,
}

impl MarginType {
    /// Wire name used by the exchange
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Crossed => "CROSSED",
        }
    }
}

impl FromStr for MarginType {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "isolated" => Ok(MarginType::Isolated),
            "cross" | "crossed" => Ok(MarginType::Crossed),
            other => Err(format!("unknown margin type '{other}'")),
        }
    }
}

/// Sizing and risk parameters for futures strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativesParams {
    pub leverage: u32,
    pub margin_type: MarginType,
    /// Quote-asset margin committed; notional = margin × leverage
    pub margin_amount: Decimal,
    #[serde(default)]
    pub take_profit_bp: u32,
    #[serde(default)]
    pub stop_loss_bp: u32,
}

impl DerivativesParams {
    pub fn notional(&self) -> Decimal {
        self.margin_amount * Decimal::from(self.leverage)
    }
}

fn default_timeout_minutes() -> u64 {
    5
}

fn default_offset_step_bp() -> Decimal {
    dec!(8)
}

fn default_grid_tolerance() -> Decimal {
    dec!(0.001)
}

/// Single order; price, trigger and offset live on the strategy row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleConfig {}

/// Shared by `iceberg` and `slow_iceberg`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayeredConfig {
    pub layers: usize,
    /// Per-layer share of the total; defaults to the built-in table
    #[serde(default)]
    pub layer_ratios: Option<Vec<Decimal>>,
    /// Per-layer price offsets in basis points; missing entries fall back
    #[serde(default)]
    pub layer_offsets_bp: Option<Vec<Decimal>>,
    /// Offset of layer 0; defaults to 0 on spot, `float_bp` on futures
    #[serde(default)]
    pub first_layer_offset_bp: Option<Decimal>,
    #[serde(default = "default_offset_step_bp")]
    pub offset_step_bp: Decimal,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
}

impl LayeredConfig {
    pub fn new(layers: usize) -> Self {
        Self {
            layers,
            layer_ratios: None,
            layer_offsets_bp: None,
            first_layer_offset_bp: None,
            offset_step_bp: default_offset_step_bp(),
            timeout_minutes: default_timeout_minutes(),
        }
    }

    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.timeout_minutes as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub grid_count: u32,
    /// Two prices closer than this are the same level
    #[serde(default = "default_grid_tolerance")]
    pub price_tolerance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringBuyConfig {
    pub interval_hours: u64,
    /// Stop once filled quote notional reaches this amount
    pub total_amount: Decimal,
}

/// Family-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum StrategyConfig {
    Simple(SimpleConfig),
    Iceberg(LayeredConfig),
    SlowIceberg(LayeredConfig),
    Grid(GridConfig),
    RecurringBuy(RecurringBuyConfig),
}

fn current_version() -> u32 {
    CONFIG_VERSION
}

#[derive(Serialize, Deserialize)]
struct ConfigEnvelope {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(flatten)]
    config: StrategyConfig,
}

impl StrategyConfig {
    pub fn family(&self) -> StrategyFamily {
        match self {
            StrategyConfig::Simple(_) => StrategyFamily::Simple,
            StrategyConfig::Iceberg(_) => StrategyFamily::Iceberg,
            StrategyConfig::SlowIceberg(_) => StrategyFamily::SlowIceberg,
            StrategyConfig::Grid(_) => StrategyFamily::Grid,
            StrategyConfig::RecurringBuy(_) => StrategyFamily::RecurringBuy,
        }
    }

    /// Decode a stored envelope and validate it.
    pub fn from_json(value: &Value) -> Result<Self> {
        let envelope: ConfigEnvelope = serde_json::from_value(value.clone())?;
        if envelope.version != CONFIG_VERSION {
            return Err(EngineError::Validation(format!(
                "unsupported strategy config version {}",
                envelope.version
            )));
        }
        envelope.config.validate()?;
        Ok(envelope.config)
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(ConfigEnvelope {
            version: CONFIG_VERSION,
            config: self.clone(),
        })?)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            StrategyConfig::Simple(_) => Ok(()),
            StrategyConfig::Iceberg(c) | StrategyConfig::SlowIceberg(c) => {
                if !(MIN_LAYERS..=MAX_LAYERS).contains(&c.layers) {
                    return Err(EngineError::Validation(format!(
                        "layers must be within {MIN_LAYERS}..={MAX_LAYERS}, got {}",
                        c.layers
                    )));
                }
                if let Some(ratios) = &c.layer_ratios {
                    if ratios.len() != c.layers {
                        return Err(EngineError::Validation(format!(
                            "layer_ratios has {} entries for {} layers",
                            ratios.len(),
                            c.layers
                        )));
                    }
                    if ratios.iter().any(|r| *r <= Decimal::ZERO) {
                        return Err(EngineError::Validation(
                            "layer_ratios must be positive".to_string(),
                        ));
                    }
                    let sum: Decimal = ratios.iter().copied().sum();
                    if (sum - Decimal::ONE).abs() > dec!(0.000001) {
                        return Err(EngineError::Validation(format!(
                            "layer_ratios must sum to 1, got {sum}"
                        )));
                    }
                }
                if let Some(offsets) = &c.layer_offsets_bp {
                    if offsets.iter().any(|o| *o < Decimal::ZERO || *o >= dec!(10000)) {
                        return Err(EngineError::Validation(
                            "layer_offsets_bp must be within [0, 10000)".to_string(),
                        ));
                    }
                }
                if c.timeout_minutes == 0 {
                    return Err(EngineError::Validation(
                        "timeout_minutes must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            StrategyConfig::Grid(c) => {
                if c.lower_price <= Decimal::ZERO || c.upper_price <= c.lower_price {
                    return Err(EngineError::Validation(
                        "grid bounds must satisfy upper > lower > 0".to_string(),
                    ));
                }
                if c.grid_count < 2 {
                    return Err(EngineError::Validation(
                        "grid_count must be at least 2".to_string(),
                    ));
                }
                Ok(())
            }
            StrategyConfig::RecurringBuy(c) => {
                if c.interval_hours == 0 {
                    return Err(EngineError::Validation(
                        "interval_hours must be positive".to_string(),
                    ));
                }
                if c.total_amount <= Decimal::ZERO {
                    return Err(EngineError::Validation(
                        "total_amount must be positive".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Engine-owned progress, survives restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub current_layer: usize,
    #[serde(default)]
    pub layer_filled_quantity: Decimal,
    #[serde(default)]
    pub total_filled_quantity: Decimal,
    /// All layers placed (iceberg)
    #[serde(default)]
    pub submitted: bool,
    /// Base quantity fixed at the first layer; futures size from margin
    /// and the price at that moment
    #[serde(default)]
    pub planned_quantity: Option<Decimal>,
    /// Highest executed quantity seen per exchange order id
    #[serde(default)]
    pub fills: BTreeMap<String, Decimal>,
}

impl Default for StrategyState {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            current_layer: 0,
            layer_filled_quantity: Decimal::ZERO,
            total_filled_quantity: Decimal::ZERO,
            submitted: false,
            planned_quantity: None,
            fills: BTreeMap::new(),
        }
    }
}

impl StrategyState {
    pub fn from_json(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let state: StrategyState = serde_json::from_value(value.clone())?;
        if state.version != CONFIG_VERSION {
            return Err(EngineError::Validation(format!(
                "unsupported strategy state version {}",
                state.version
            )));
        }
        Ok(state)
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Record the executed quantity observed for an order and return the
    /// newly filled amount. Observations never move backwards, so replaying
    /// the same or an older report adds nothing.
    pub fn record_fill(
        &mut self,
        exchange_order_id: &str,
        executed_qty: Decimal,
        counts_toward_layer: bool,
    ) -> Decimal {
        let previous = self
            .fills
            .get(exchange_order_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if executed_qty <= previous {
            return Decimal::ZERO;
        }
        let delta = executed_qty - previous;
        self.fills.insert(exchange_order_id.to_string(), executed_qty);
        self.total_filled_quantity += delta;
        if counts_toward_layer {
            self.layer_filled_quantity += delta;
        }
        delta
    }

    pub fn advance_layer(&mut self) {
        self.current_layer += 1;
        self.layer_filled_quantity = Decimal::ZERO;
    }
}

/// Persisted strategy row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub symbol: String,
    pub market: Market,
    pub side: OrderSide,
    /// Base quantity for spot families
    pub quantity: Decimal,
    /// Limit price for simple spot orders
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    /// Price offset in basis points
    pub float_bp: Decimal,
    pub derivatives: Option<DerivativesParams>,
    pub config: StrategyConfig,
    pub state: StrategyState,
    pub is_active: bool,
    pub is_completed: bool,
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn family(&self) -> StrategyFamily {
        self.config.family()
    }

    /// Scheduler evaluates only active, unfinished strategies
    pub fn is_runnable(&self) -> bool {
        self.is_active && !self.is_completed
    }
}

/// Creation payload; validated before it reaches storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStrategy {
    pub user_id: i64,
    pub name: String,
    pub symbol: String,
    pub market: Market,
    pub side: OrderSide,
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub trigger_price: Option<Decimal>,
    #[serde(default)]
    pub float_bp: Decimal,
    #[serde(default)]
    pub derivatives: Option<DerivativesParams>,
    pub config: StrategyConfig,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewStrategy {
    pub fn validate(&self) -> Result<()> {
        let family = self.config.family();
        if self.symbol.trim().is_empty() {
            return Err(EngineError::Validation("symbol is required".to_string()));
        }
        if !family.supports(self.market) {
            return Err(EngineError::Validation(format!(
                "{family} strategies are not available on {} markets",
                self.market
            )));
        }
        if let Some(price) = self.price {
            if price <= Decimal::ZERO {
                return Err(EngineError::Validation("price must be positive".to_string()));
            }
        }
        if let Some(trigger) = self.trigger_price {
            if trigger <= Decimal::ZERO {
                return Err(EngineError::Validation(
                    "trigger_price must be positive".to_string(),
                ));
            }
        }
        if self.float_bp < Decimal::ZERO || self.float_bp > dec!(10000) {
            return Err(EngineError::Validation(
                "float_bp must be within 0..=10000".to_string(),
            ));
        }
        if family.is_layered() && self.market == Market::Spot && self.trigger_price.is_none() {
            return Err(EngineError::Validation(
                "layered strategies need a trigger_price".to_string(),
            ));
        }

        match self.market {
            Market::Spot => {
                if self.derivatives.is_some() {
                    return Err(EngineError::Validation(
                        "spot strategies take no leverage parameters".to_string(),
                    ));
                }
                if self.quantity <= Decimal::ZERO {
                    return Err(EngineError::Validation(
                        "quantity must be positive".to_string(),
                    ));
                }
            }
            Market::Futures => {
                let params = self.derivatives.as_ref().ok_or_else(|| {
                    EngineError::Validation(
                        "futures strategies need leverage and margin".to_string(),
                    )
                })?;
                if !(1..=MAX_STRATEGY_LEVERAGE).contains(&params.leverage) {
                    return Err(EngineError::Validation(format!(
                        "leverage must be within 1..={MAX_STRATEGY_LEVERAGE}"
                    )));
                }
                if params.margin_amount <= Decimal::ZERO {
                    return Err(EngineError::Validation(
                        "margin_amount must be positive".to_string(),
                    ));
                }
            }
        }

        self.config.validate()
    }

    pub fn into_strategy(self, id: i64, now: DateTime<Utc>) -> Strategy {
        Strategy {
            id,
            user_id: self.user_id,
            name: self.name,
            symbol: self.symbol.to_ascii_uppercase(),
            market: self.market,
            side: self.side,
            quantity: self.quantity,
            price: self.price,
            trigger_price: self.trigger_price,
            float_bp: self.float_bp,
            derivatives: self.derivatives,
            config: self.config,
            state: StrategyState::default(),
            is_active: self.is_active,
            is_completed: false,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Auditable outcome of engine work that happens off the tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyEvent {
    pub strategy_id: i64,
    pub kind: String,
    pub success: bool,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl StrategyEvent {
    pub fn new(strategy_id: i64, kind: &str, success: bool, detail: impl Into<String>) -> Self {
        Self {
            strategy_id,
            kind: kind.to_string(),
            success,
            detail: detail.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spot_iceberg(layers: usize) -> NewStrategy {
        NewStrategy {
            user_id: 1,
            name: "ice".to_string(),
            symbol: "btcusdt".to_string(),
            market: Market::Spot,
            side: OrderSide::Sell,
            quantity: dec!(1),
            price: None,
            trigger_price: Some(dec!(100)),
            float_bp: Decimal::ZERO,
            derivatives: None,
            config: StrategyConfig::Iceberg(LayeredConfig::new(layers)),
            is_active: true,
        }
    }

    #[test]
    fn config_envelope_round_trips_with_version() {
        let config = StrategyConfig::SlowIceberg(LayeredConfig::new(5));
        let value = config.to_json().unwrap();
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["family"], json!("slow_iceberg"));
        assert_eq!(StrategyConfig::from_json(&value).unwrap(), config);
    }

    #[test]
    fn config_without_version_is_current() {
        let value = json!({"family": "grid", "lower_price": "90", "upper_price": 110, "grid_count": 5});
        match StrategyConfig::from_json(&value).unwrap() {
            StrategyConfig::Grid(grid) => {
                assert_eq!(grid.grid_count, 5);
                assert_eq!(grid.price_tolerance, dec!(0.001));
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn future_versions_are_rejected() {
        let value = json!({"version": 2, "family": "simple"});
        assert!(StrategyConfig::from_json(&value).is_err());
    }

    #[test]
    fn layer_count_is_bounded() {
        assert!(spot_iceberg(4).validate().is_err());
        assert!(spot_iceberg(5).validate().is_ok());
        assert!(spot_iceberg(10).validate().is_ok());
        assert!(spot_iceberg(11).validate().is_err());
    }

    #[test]
    fn custom_ratios_must_sum_to_one() {
        let mut s = spot_iceberg(5);
        s.config = StrategyConfig::Iceberg(LayeredConfig {
            layer_ratios: Some(vec![dec!(0.3), dec!(0.3), dec!(0.2), dec!(0.1), dec!(0.05)]),
            ..LayeredConfig::new(5)
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn grid_is_spot_only() {
        let mut s = spot_iceberg(5);
        s.market = Market::Futures;
        s.derivatives = Some(DerivativesParams {
            leverage: 8,
            margin_type: MarginType::Crossed,
            margin_amount: dec!(100),
            take_profit_bp: 0,
            stop_loss_bp: 0,
        });
        s.config = StrategyConfig::Grid(GridConfig {
            lower_price: dec!(90),
            upper_price: dec!(110),
            grid_count: 5,
            price_tolerance: dec!(0.001),
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn futures_leverage_is_bounded() {
        let mut s = spot_iceberg(5);
        s.market = Market::Futures;
        s.derivatives = Some(DerivativesParams {
            leverage: 21,
            margin_type: MarginType::Isolated,
            margin_amount: dec!(100),
            take_profit_bp: 100,
            stop_loss_bp: 50,
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn fill_accounting_is_monotonic_per_order() {
        let mut state = StrategyState::default();
        assert_eq!(state.record_fill("A", dec!(0.2), true), dec!(0.2));
        // Replayed or stale observations add nothing
        assert_eq!(state.record_fill("A", dec!(0.2), true), Decimal::ZERO);
        assert_eq!(state.record_fill("A", dec!(0.1), true), Decimal::ZERO);
        assert_eq!(state.record_fill("A", dec!(0.5), true), dec!(0.3));
        // A resubmitted order at the same layer is tracked separately
        assert_eq!(state.record_fill("B", dec!(0.1), false), dec!(0.1));

        assert_eq!(state.layer_filled_quantity, dec!(0.5));
        assert_eq!(state.total_filled_quantity, dec!(0.6));
    }

    #[test]
    fn null_state_is_default() {
        assert_eq!(StrategyState::from_json(&Value::Null).unwrap(), StrategyState::default());
    }
}
