use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{MarginType, PositionSide};

/// Last known futures position, overwritten on every refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub user_id: i64,
    pub symbol: String,
    pub position_side: PositionSide,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub liquidation_price: Decimal,
    pub leverage: u32,
    pub max_notional: Decimal,
    pub margin_type: MarginType,
    pub isolated_margin: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.position_amt.is_zero()
    }

    pub fn notional(&self) -> Decimal {
        (self.position_amt * self.mark_price).abs()
    }
}
