use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Dual-investment product offered by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualProduct {
    pub product_id: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub duration_days: i64,
    /// Annualised yield as a fraction (0.05 = 5%)
    pub yield_rate: Decimal,
    pub is_active: bool,
}

impl DualProduct {
    pub fn accepts(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DualInvestmentType {
    /// One live order at a time
    Single,
    /// New order each time the previous one settles
    AutoReinvest,
    /// Up to `ladder_steps` purchases of `amount_per_step`
    Ladder,
    /// Buy once the pair trades at or above `trigger_price`
    PriceTrigger,
}

impl DualInvestmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DualInvestmentType::Single => "single",
            DualInvestmentType::AutoReinvest => "auto_reinvest",
            DualInvestmentType::Ladder => "ladder",
            DualInvestmentType::PriceTrigger => "price_trigger",
        }
    }
}

impl FromStr for DualInvestmentType {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim() {
            "single" => Ok(DualInvestmentType::Single),
            "auto_reinvest" => Ok(DualInvestmentType::AutoReinvest),
            "ladder" => Ok(DualInvestmentType::Ladder),
            "price_trigger" => Ok(DualInvestmentType::PriceTrigger),
            other => Err(format!("unknown investment type '{other}'")),
        }
    }
}

/// Recurring investment plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualStrategy {
    pub id: i64,
    pub user_id: i64,
    pub product_id: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub investment_type: DualInvestmentType,
    pub amount: Decimal,
    pub trigger_price: Option<Decimal>,
    pub min_yield_rate: Decimal,
    pub ladder_steps: u32,
    pub amount_per_step: Decimal,
    pub is_active: bool,
}

impl DualStrategy {
    pub fn pair(&self) -> String {
        format!("{}{}", self.base_asset, self.quote_asset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DualOrderStatus {
    Purchased,
    Settled,
    Failed,
}

impl DualOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DualOrderStatus::Purchased => "PURCHASED",
            DualOrderStatus::Settled => "SETTLED",
            DualOrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, DualOrderStatus::Purchased)
    }
}

impl FromStr for DualOrderStatus {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PURCHASED" => Ok(DualOrderStatus::Purchased),
            "SETTLED" => Ok(DualOrderStatus::Settled),
            "FAILED" => Ok(DualOrderStatus::Failed),
            other => Err(format!("unknown dual order status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualOrder {
    pub id: i64,
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub product_id: String,
    pub order_ref: String,
    pub amount: Decimal,
    pub currency: String,
    pub yield_rate: Decimal,
    pub status: DualOrderStatus,
    pub purchased_at: DateTime<Utc>,
    pub settles_at: DateTime<Utc>,
}

/// Insert payload for a new purchase
#[derive(Debug, Clone, PartialEq)]
pub struct NewDualOrder {
    pub user_id: i64,
    pub strategy_id: i64,
    pub product_id: String,
    pub order_ref: String,
    pub amount: Decimal,
    pub currency: String,
    pub yield_rate: Decimal,
    pub purchased_at: DateTime<Utc>,
    pub settles_at: DateTime<Utc>,
}
