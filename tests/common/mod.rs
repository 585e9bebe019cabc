//! Scripted exchange and wiring shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cctrade::adapters::round_order;
use cctrade::config::EngineConfig;
use cctrade::coordination::{GracefulShutdown, TaskSupervisor};
use cctrade::domain::{
    precision_of, AccountSnapshot, Balance, BookTop, GridConfig, LayeredConfig, MarginType, Market, NewStrategy,
    OrderReport, OrderRequest, OrderSide, OrderStatus, OrderType, Position, SimpleConfig,
    Strategy, StrategyConfig, SymbolInfo, WithdrawReceipt, WithdrawRequest,
};
use cctrade::error::{EngineError, ExchangeError, Result};
use cctrade::exchange::{DiagnosisReport, ExchangeApi, ExchangeProvider};
use cctrade::persistence::{MemoryStore, Store};
use cctrade::strategy::StrategyEngine;

pub const USER: i64 = 1;

#[derive(Default)]
struct Book {
    prices: HashMap<String, Decimal>,
    top: BookTop,
    next_id: u64,
    placed: Vec<OrderRequest>,
    reports: HashMap<String, OrderReport>,
    canceled: Vec<String>,
    fail_cancel: bool,
    balances: Vec<Balance>,
    positions: Vec<Position>,
    withdrawals: Vec<WithdrawRequest>,
    leverage_calls: Vec<(String, u32)>,
    margin_calls: Vec<(String, MarginType)>,
    lot: Option<Lot>,
}

/// Quantity filter of every symbol on the fake
#[derive(Debug, Clone, Copy)]
pub struct Lot {
    pub step: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
}

impl Default for Lot {
    fn default() -> Self {
        Self {
            step: dec!(0.00001),
            min_qty: dec!(0.00001),
            max_qty: dec!(9000),
        }
    }
}

/// In-memory exchange: limit orders rest until [`FakeExchange::fill`],
/// market orders fill at the scripted price. Requests are rounded and
/// checked against the lot filter like the real gateway does.
pub struct FakeExchange {
    user_id: Option<i64>,
    book: Mutex<Book>,
}

impl FakeExchange {
    pub fn new(user_id: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            user_id,
            book: Mutex::new(Book::default()),
        })
    }

    fn book(&self) -> std::sync::MutexGuard<'_, Book> {
        self.book.lock().unwrap()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.book().prices.insert(symbol.to_string(), price);
    }

    pub fn set_top(&self, best_bid: Option<Decimal>, best_ask: Option<Decimal>) {
        self.book().top = BookTop { best_bid, best_ask };
    }

    pub fn set_balance(&self, asset: &str, free: Decimal) {
        let mut book = self.book();
        book.balances.retain(|b| b.asset != asset);
        book.balances.push(Balance {
            asset: asset.to_string(),
            free,
            locked: Decimal::ZERO,
        });
    }

    pub fn push_position(&self, position: Position) {
        self.book().positions.push(position);
    }

    pub fn set_lot(&self, lot: Lot) {
        self.book().lot = Some(lot);
    }

    fn info(&self, symbol: &str) -> SymbolInfo {
        let lot = self.book().lot.unwrap_or_default();
        SymbolInfo {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            min_qty: lot.min_qty,
            max_qty: lot.max_qty,
            step_size: lot.step,
            tick_size: dec!(0.01),
            min_notional: dec!(5),
            price_precision: 2,
            quantity_precision: precision_of(lot.step),
        }
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.book().fail_cancel = fail;
    }

    /// Requests accepted so far, oldest first
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.book().placed.clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.book().canceled.clone()
    }

    pub fn withdrawals(&self) -> Vec<WithdrawRequest> {
        self.book().withdrawals.clone()
    }

    pub fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.book().leverage_calls.clone()
    }

    /// Report `executed` for a resting order.
    pub fn fill(&self, exchange_order_id: &str, executed: Decimal) {
        let mut book = self.book();
        let report = book
            .reports
            .get_mut(exchange_order_id)
            .expect("unknown order");
        report.executed_qty = executed;
        report.cumulative_quote_qty = executed * report.price.unwrap_or(Decimal::ONE);
        report.status = if executed >= report.orig_qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }

    fn report(&self, exchange_order_id: &str) -> Result<OrderReport> {
        self.book()
            .reports
            .get(exchange_order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::OrderNotFound(exchange_order_id.to_string()).into())
    }
}

#[async_trait]
impl ExchangeApi for FakeExchange {
    fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    async fn price(&self, _market: Market, symbol: &str) -> Result<Decimal> {
        self.book()
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::InvalidSymbol(symbol.to_string()).into())
    }

    async fn depth(&self, _market: Market, _symbol: &str) -> Result<BookTop> {
        Ok(self.book().top)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReport> {
        let request = &round_order(&self.info(&request.symbol), request)?;
        let mut book = self.book();
        book.next_id += 1;
        let id = book.next_id.to_string();
        let last = book
            .prices
            .get(&request.symbol)
            .copied()
            .unwrap_or(Decimal::ONE);

        let report = match request.order_type {
            OrderType::Market => OrderReport {
                exchange_order_id: id.clone(),
                client_order_id: request.client_order_id.clone(),
                symbol: request.symbol.clone(),
                status: OrderStatus::Filled,
                price: Some(last),
                orig_qty: request.quantity,
                executed_qty: request.quantity,
                cumulative_quote_qty: request.quantity * last,
            },
            _ => OrderReport {
                exchange_order_id: id.clone(),
                client_order_id: request.client_order_id.clone(),
                symbol: request.symbol.clone(),
                status: OrderStatus::New,
                price: request.price,
                orig_qty: request.quantity,
                executed_qty: Decimal::ZERO,
                cumulative_quote_qty: Decimal::ZERO,
            },
        };
        book.placed.push(request.clone());
        book.reports.insert(id, report.clone());
        Ok(report)
    }

    async fn cancel_order(
        &self,
        _market: Market,
        _symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderReport> {
        let mut book = self.book();
        if book.fail_cancel {
            return Err(ExchangeError::NetworkUnavailable("scripted".into()).into());
        }
        let report = book
            .reports
            .get_mut(exchange_order_id)
            .ok_or_else(|| ExchangeError::OrderNotFound(exchange_order_id.to_string()))?;
        if !report.status.is_terminal() {
            report.status = OrderStatus::Canceled;
        }
        let report = report.clone();
        book.canceled.push(exchange_order_id.to_string());
        Ok(report)
    }

    async fn query_order(
        &self,
        _market: Market,
        _symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderReport> {
        self.report(exchange_order_id)
    }

    async fn account(&self, _market: Market) -> Result<AccountSnapshot> {
        Ok(AccountSnapshot {
            can_trade: true,
            balances: self.book().balances.clone(),
        })
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        Ok(self.book().positions.clone())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.book()
            .leverage_calls
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<()> {
        self.book()
            .margin_calls
            .push((symbol.to_string(), margin_type));
        Ok(())
    }

    async fn symbol_info(&self, _market: Market, symbol: &str) -> Result<SymbolInfo> {
        Ok(self.info(symbol))
    }

    async fn server_time(&self, _market: Market) -> Result<i64> {
        Ok(Utc::now().timestamp_millis())
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<WithdrawReceipt> {
        let mut book = self.book();
        book.withdrawals.push(request.clone());
        Ok(WithdrawReceipt {
            id: format!("wd-{}", book.withdrawals.len()),
        })
    }
}

/// Hands out one fake exchange per configured user.
pub struct FakeProvider {
    users: HashMap<i64, Arc<FakeExchange>>,
    public: Arc<FakeExchange>,
}

impl FakeProvider {
    pub fn single(exchange: Arc<FakeExchange>) -> Arc<Self> {
        Arc::new(Self {
            users: HashMap::from([(USER, Arc::clone(&exchange))]),
            public: exchange,
        })
    }
}

#[async_trait]
impl ExchangeProvider for FakeProvider {
    async fn for_user(&self, user_id: i64) -> Result<Arc<dyn ExchangeApi>> {
        match self.users.get(&user_id) {
            Some(exchange) => {
                let exchange: Arc<dyn ExchangeApi> = exchange.clone();
                Ok(exchange)
            }
            None => Err(EngineError::CredentialsNotConfigured(user_id)),
        }
    }

    fn public(&self) -> Arc<dyn ExchangeApi> {
        self.public.clone()
    }

    async fn diagnose(&self, user_id: i64) -> DiagnosisReport {
        DiagnosisReport {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    async fn users_with_credentials(&self) -> Result<Vec<i64>> {
        let mut users: Vec<i64> = self.users.keys().copied().collect();
        users.sort_unstable();
        Ok(users)
    }
}

/// Engine wired to a memory store and one fake exchange.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub exchange: Arc<FakeExchange>,
    pub provider: Arc<FakeProvider>,
    pub tasks: Arc<TaskSupervisor>,
    pub engine: StrategyEngine,
    // Dropping the coordinator cancels supervised tasks
    _shutdown: GracefulShutdown,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let exchange = FakeExchange::new(Some(USER));
        let provider = FakeProvider::single(Arc::clone(&exchange));
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        let tasks = TaskSupervisor::new(shutdown.token());
        let config = EngineConfig {
            lease_secs: 120,
            protective_order_delay_secs: 0,
        };
        let engine = StrategyEngine::new(
            &config,
            store.clone(),
            provider.clone(),
            Arc::clone(&tasks),
        );
        Self {
            store,
            exchange,
            provider,
            tasks,
            engine,
            _shutdown: shutdown,
        }
    }

    pub async fn create(&self, strategy: NewStrategy) -> Strategy {
        self.store.create_strategy(strategy).await.unwrap()
    }

    pub async fn reload(&self, id: i64) -> Strategy {
        self.store.get_strategy(id).await.unwrap().unwrap()
    }

    /// Move every order of `strategy_id` into the past.
    pub fn age_orders(&self, strategy_id: i64, by: chrono::Duration) {
        for mut order in self.store.all_orders() {
            if order.strategy_id == Some(strategy_id) {
                order.created_at -= by;
                self.store.put_order(order);
            }
        }
    }
}

pub fn spot(side: OrderSide, quantity: Decimal, config: StrategyConfig) -> NewStrategy {
    NewStrategy {
        user_id: USER,
        name: "test".to_string(),
        symbol: "BTCUSDT".to_string(),
        market: Market::Spot,
        side,
        quantity,
        price: None,
        trigger_price: None,
        float_bp: Decimal::ZERO,
        derivatives: None,
        config,
        is_active: true,
    }
}

pub fn simple() -> StrategyConfig {
    StrategyConfig::Simple(SimpleConfig::default())
}

pub fn iceberg(layers: usize) -> StrategyConfig {
    StrategyConfig::Iceberg(LayeredConfig::new(layers))
}

pub fn slow_iceberg(layers: usize) -> StrategyConfig {
    StrategyConfig::SlowIceberg(LayeredConfig::new(layers))
}

pub fn grid(lower: Decimal, upper: Decimal, count: u32) -> StrategyConfig {
    StrategyConfig::Grid(GridConfig {
        lower_price: lower,
        upper_price: upper,
        grid_count: count,
        price_tolerance: dec!(0.001),
    })
}
