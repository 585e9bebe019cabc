use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Automatic withdrawal rule owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRule {
    pub id: i64,
    pub user_id: i64,
    pub asset: String,
    pub address: String,
    pub network: Option<String>,
    pub amount: Decimal,
    /// Balance that must remain after the withdrawal
    pub min_balance: Decimal,
    /// Only withdraw once `<ASSET>USDT` trades at or above this price
    pub trigger_price: Option<Decimal>,
    pub is_active: bool,
    pub auto_withdraw: bool,
}

impl WithdrawalRule {
    pub fn price_symbol(&self) -> String {
        format!("{}USDT", self.asset.to_ascii_uppercase())
    }
}

/// Parameters of a single withdrawal call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub asset: String,
    pub address: String,
    pub network: Option<String>,
    pub amount: Decimal,
}

impl From<&WithdrawalRule> for WithdrawRequest {
    fn from(rule: &WithdrawalRule) -> Self {
        Self {
            asset: rule.asset.to_ascii_uppercase(),
            address: rule.address.clone(),
            network: rule.network.clone(),
            amount: rule.amount,
        }
    }
}

/// Exchange acknowledgement of a withdrawal request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub id: String,
}

/// History row for an executed withdrawal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub user_id: i64,
    pub rule_id: Option<i64>,
    pub asset: String,
    pub amount: Decimal,
    pub address: String,
    pub network: Option<String>,
    pub tx_id: String,
    pub status: String,
    pub applied_at: DateTime<Utc>,
}
