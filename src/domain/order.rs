use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::Market;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    #[serde(alias = "buy", alias = "LONG", alias = "long")]
    Buy,
    #[serde(alias = "sell", alias = "SHORT", alias = "short")]
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Hedge-mode position side opened by this order side.
    pub fn position_side(&self) -> PositionSide {
        match self {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Ok(OrderSide::Buy),
            "SELL" | "SHORT" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side '{other}'")),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
    LimitMaker,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub const ALL: [OrderType; 10] = [
        OrderType::Market,
        OrderType::Limit,
        OrderType::Stop,
        OrderType::StopLoss,
        OrderType::StopLossLimit,
        OrderType::TakeProfit,
        OrderType::TakeProfitLimit,
        OrderType::LimitMaker,
        OrderType::StopMarket,
        OrderType::TakeProfitMarket,
    ];

    /// Wire name used by the exchange
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
            OrderType::LimitMaker => "LIMIT_MAKER",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }

    pub fn requires_price(&self) -> bool {
        matches!(
            self,
            OrderType::Limit
                | OrderType::Stop
                | OrderType::StopLossLimit
                | OrderType::TakeProfitLimit
                | OrderType::LimitMaker
        )
    }

    pub fn requires_stop_price(&self) -> bool {
        matches!(
            self,
            OrderType::Stop
                | OrderType::StopLoss
                | OrderType::StopLossLimit
                | OrderType::TakeProfit
                | OrderType::TakeProfitLimit
                | OrderType::StopMarket
                | OrderType::TakeProfitMarket
        )
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_uppercase();
        OrderType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown order type '{raw}'"))
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good Till Cancelled
    GTC,
    /// Immediate Or Cancel
    IOC,
    /// Fill Or Kill
    FOK,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::GTC => "GTC",
            TimeInForce::IOC => "IOC",
            TimeInForce::FOK => "FOK",
        }
    }
}

/// Futures position side (hedge mode uses LONG/SHORT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Both => "BOTH",
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BOTH" | "" => Ok(PositionSide::Both),
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            other => Err(format!("unknown position side '{other}'")),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Recorded locally, not yet acknowledged
    Pending,
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::New => "new",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::PendingCancel => "pending_cancel",
            OrderStatus::Expired => "expired",
            OrderStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }

    /// Still resting on the book (can fill or be cancelled).
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }

    /// Parse the exchange's status string (`NEW`, `PARTIALLY_FILLED`, `EXPIRED_IN_MATCH`, ...).
    pub fn from_exchange(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "CANCELLED" => OrderStatus::Canceled,
            "PENDING_CANCEL" => OrderStatus::PendingCancel,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "new" => Ok(OrderStatus::New),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "canceled" | "cancelled" => Ok(OrderStatus::Canceled),
            "pending_cancel" => Ok(OrderStatus::PendingCancel),
            "expired" => Ok(OrderStatus::Expired),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// Order request (what we want the exchange to do)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub market: Market,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub position_side: Option<PositionSide>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(market: Market, symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().simple().to_string(),
            market,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            position_side: None,
            reduce_only: false,
        }
    }

    pub fn limit(
        market: Market,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            time_in_force: Some(TimeInForce::GTC),
            ..Self::market(market, symbol, side, quantity)
        }
    }

    /// Reduce-only trigger order closing a futures position.
    pub fn protective(
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        stop_price: Decimal,
        position_side: PositionSide,
    ) -> Self {
        Self {
            order_type,
            stop_price: Some(stop_price),
            position_side: Some(position_side),
            reduce_only: true,
            ..Self::market(Market::Futures, symbol, side, quantity)
        }
    }

    pub fn with_position_side(mut self, position_side: PositionSide) -> Self {
        self.position_side = Some(position_side);
        self
    }

    pub fn with_client_order_id(mut self, client_order_id: String) -> Self {
        self.client_order_id = client_order_id;
        self
    }

    pub fn notional(&self) -> Option<Decimal> {
        self.price.map(|p| p * self.quantity)
    }
}

/// Exchange's view of an order (ack or status query)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
}

/// Order row tracked in our system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub market: Market,
    pub symbol: String,
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub position_side: Option<PositionSide>,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    /// Layer index for layered strategies
    pub layer: Option<i32>,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Still able to trade: anything short of a terminal status, including
    /// orders awaiting acknowledgement or cancellation.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Insert payload for a freshly submitted order
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub layer: Option<i32>,
    pub request: OrderRequest,
    pub report: OrderReport,
}

impl NewOrder {
    pub fn new(
        user_id: i64,
        strategy_id: Option<i64>,
        layer: Option<i32>,
        request: OrderRequest,
        report: OrderReport,
    ) -> Self {
        Self {
            user_id,
            strategy_id,
            layer,
            request,
            report,
        }
    }

    /// Materialize the row as the store would return it.
    pub fn into_order(self, id: i64, now: DateTime<Utc>) -> Order {
        Order {
            id,
            user_id: self.user_id,
            strategy_id: self.strategy_id,
            market: self.request.market,
            symbol: self.request.symbol,
            exchange_order_id: self.report.exchange_order_id,
            client_order_id: self.request.client_order_id,
            side: self.request.side,
            order_type: self.request.order_type,
            position_side: self.request.position_side,
            quantity: if self.report.orig_qty.is_zero() {
                self.request.quantity
            } else {
                self.report.orig_qty
            },
            price: self.report.price.or(self.request.price),
            stop_price: self.request.stop_price,
            reduce_only: self.request.reduce_only,
            layer: self.layer,
            status: self.report.status,
            executed_qty: self.report.executed_qty,
            cumulative_quote_qty: self.report.cumulative_quote_qty,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Reconciled fields for an existing order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub order_id: i64,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::PendingCancel.is_terminal());
        assert!(OrderStatus::PartiallyFilled.is_open());
    }

    #[test]
    fn orders_stay_open_until_terminal() {
        let request = OrderRequest::limit(Market::Spot, "BTCUSDT", OrderSide::Buy, dec!(1), dec!(100));
        let report = OrderReport {
            exchange_order_id: "1".into(),
            client_order_id: request.client_order_id.clone(),
            symbol: "BTCUSDT".into(),
            status: OrderStatus::New,
            orig_qty: dec!(1),
            executed_qty: Decimal::ZERO,
            cumulative_quote_qty: Decimal::ZERO,
            price: Some(dec!(100)),
        };
        let mut order = NewOrder::new(1, Some(1), Some(0), request, report).into_order(1, Utc::now());

        for status in [OrderStatus::Pending, OrderStatus::New, OrderStatus::PartiallyFilled, OrderStatus::PendingCancel] {
            order.status = status;
            assert!(order.is_open(), "{status:?}");
        }
        for status in [OrderStatus::Filled, OrderStatus::Canceled, OrderStatus::Expired, OrderStatus::Rejected] {
            order.status = status;
            assert!(!order.is_open(), "{status:?}");
        }
    }

    #[test]
    fn exchange_status_strings_parse() {
        assert_eq!(OrderStatus::from_exchange("PARTIALLY_FILLED"), OrderStatus::PartiallyFilled);
        assert_eq!(OrderStatus::from_exchange("EXPIRED_IN_MATCH"), OrderStatus::Expired);
        assert_eq!(OrderStatus::from_exchange("CANCELED"), OrderStatus::Canceled);
        assert_eq!(OrderStatus::from_exchange("???"), OrderStatus::Pending);
    }

    #[test]
    fn order_type_wire_names_round_trip() {
        for t in OrderType::ALL {
            assert_eq!(t.as_str().parse::<OrderType>().unwrap(), t);
        }
        assert!(OrderType::StopMarket.requires_stop_price());
        assert!(!OrderType::Market.requires_price());
    }

    #[test]
    fn limit_builder_sets_gtc() {
        let req = OrderRequest::limit(Market::Spot, "BTCUSDT", OrderSide::Buy, dec!(0.5), dec!(100));
        assert_eq!(req.order_type, OrderType::Limit);
        assert_eq!(req.time_in_force, Some(TimeInForce::GTC));
        assert_eq!(req.notional(), Some(dec!(50.0)));
        assert!(!req.client_order_id.is_empty());
    }

    #[test]
    fn protective_orders_are_reduce_only() {
        let req = OrderRequest::protective(
            "ETHUSDT",
            OrderSide::Sell,
            OrderType::StopMarket,
            dec!(1),
            dec!(1900),
            PositionSide::Long,
        );
        assert!(req.reduce_only);
        assert_eq!(req.market, Market::Futures);
        assert_eq!(req.stop_price, Some(dec!(1900)));
    }

    #[test]
    fn side_parsing_accepts_long_short() {
        assert_eq!("long".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("SHORT".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.position_side(), PositionSide::Short);
    }
}
