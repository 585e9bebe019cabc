use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which exchange product line an order or strategy targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Spot,
    Futures,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Spot => "spot",
            Market::Futures => "futures",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(Market::Spot),
            "futures" | "usdm" | "perp" => Ok(Market::Futures),
            other => Err(format!("unknown market '{other}'")),
        }
    }
}

/// Best bid / best ask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTop {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
}

/// Latest observed price for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub market: Market,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Trading rules for one instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_notional: Decimal,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

/// Number of decimals implied by a step such as `0.00100000`.
pub fn precision_of(step: Decimal) -> u32 {
    if step.is_zero() {
        return 8;
    }
    step.normalize().scale()
}

impl SymbolInfo {
    /// Round a quantity down to the lot step and declared precision.
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        let stepped = if self.step_size > Decimal::ZERO {
            (quantity / self.step_size).floor() * self.step_size
        } else {
            quantity
        };
        stepped
            .round_dp_with_strategy(self.quantity_precision, RoundingStrategy::ToZero)
            .normalize()
    }

    /// `quantity` rounded down to the lot step, or `None` when what is left
    /// is zero or under `min_qty` and the exchange would refuse it.
    pub fn tradable_quantity(&self, quantity: Decimal) -> Option<Decimal> {
        let rounded = self.round_quantity(quantity);
        (rounded > Decimal::ZERO && rounded >= self.min_qty).then_some(rounded)
    }

    /// Round a price to the nearest tick and declared precision.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        let ticked = if self.tick_size > Decimal::ZERO {
            (price / self.tick_size).round() * self.tick_size
        } else {
            price
        };
        ticked
            .round_dp_with_strategy(self.price_precision, RoundingStrategy::MidpointAwayFromZero)
            .normalize()
    }
}

/// Free/locked amount of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Account snapshot as reported by the exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub can_trade: bool,
    pub balances: Vec<Balance>,
}

impl AccountSnapshot {
    pub fn free(&self, asset: &str) -> Decimal {
        self.balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_rules() -> SymbolInfo {
        SymbolInfo {
            symbol: "BTCUSDT".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            min_qty: dec!(0.00001),
            max_qty: dec!(9000),
            step_size: dec!(0.00001),
            tick_size: dec!(0.01),
            min_notional: dec!(5),
            price_precision: precision_of(dec!(0.01000000)),
            quantity_precision: precision_of(dec!(0.00001000)),
        }
    }

    #[test]
    fn precision_follows_step_size() {
        assert_eq!(precision_of(dec!(0.00100000)), 3);
        assert_eq!(precision_of(dec!(1.00000000)), 0);
        assert_eq!(precision_of(dec!(0.01)), 2);
    }

    #[test]
    fn quantity_rounds_down_to_step() {
        let rules = btc_rules();
        assert_eq!(rules.round_quantity(dec!(0.123456789)), dec!(0.12345));
        assert_eq!(rules.round_quantity(dec!(0.000009)), dec!(0));
    }

    #[test]
    fn leftovers_under_the_step_are_not_tradable() {
        let rules = SymbolInfo {
            min_qty: dec!(0.001),
            step_size: dec!(0.001),
            quantity_precision: 3,
            ..btc_rules()
        };
        assert_eq!(rules.tradable_quantity(dec!(0.33333)), Some(dec!(0.333)));
        assert_eq!(rules.tradable_quantity(dec!(0.00033)), None);
        assert_eq!(rules.tradable_quantity(dec!(-0.5)), None);
    }

    #[test]
    fn price_rounds_to_tick() {
        let rules = btc_rules();
        assert_eq!(rules.round_price(dec!(64123.456)), dec!(64123.46));
        assert_eq!(rules.round_price(dec!(64123.454)), dec!(64123.45));
    }

    #[test]
    fn market_parses_aliases() {
        assert_eq!("SPOT".parse::<Market>().unwrap(), Market::Spot);
        assert_eq!("usdm".parse::<Market>().unwrap(), Market::Futures);
        assert!("margin".parse::<Market>().is_err());
    }

    #[test]
    fn free_balance_defaults_to_zero() {
        let account = AccountSnapshot {
            can_trade: true,
            balances: vec![Balance {
                asset: "USDT".to_string(),
                free: dec!(12.5),
                locked: dec!(0),
            }],
        };
        assert_eq!(account.free("usdt"), dec!(12.5));
        assert_eq!(account.free("BTC"), Decimal::ZERO);
    }
}
