//! Binance-style REST gateway for spot and USDT-margined futures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ExchangeConfig, GatewayConfig};
use crate::domain::{
    AccountSnapshot, Balance, BookTop, MarginType, Market, OrderReport, OrderRequest,
    OrderStatus, Position, PositionSide, SymbolInfo, WithdrawReceipt, WithdrawRequest,
};
use crate::error::{EngineError, ExchangeError, Result};
use crate::exchange::diagnosis::{probe_windows, AuthProbe, DiagnosisReport};
use crate::exchange::errors::{classify_response, classify_transport};
use crate::exchange::pool::{ClientPool, ClientSettings};
use crate::exchange::rate_limit::RateLimiter;
use crate::exchange::symbols::{parse_exchange_info, SymbolCache};
use crate::exchange::ExchangeApi;
use crate::signing::hmac::has_expected_key_format;
use crate::signing::{inject_agent_code, timestamp_ms, ApiCredentials, RequestParts, RequestSigner};

pub const MIN_LEVERAGE: u32 = 1;
pub const MAX_LEVERAGE: u32 = 125;

/// Exchange response for a margin type or leverage that is already set
const NO_CHANGE_CODE: i64 = -4046;

/// State shared by every per-user gateway: pools, limiter, instrument rules.
#[derive(Debug)]
pub struct GatewayCore {
    exchange: ExchangeConfig,
    order_timeout: Duration,
    quote_timeout: Duration,
    spot_pool: Arc<ClientPool>,
    futures_pool: Arc<ClientPool>,
    limiter: RateLimiter,
    spot_symbols: SymbolCache,
    futures_symbols: SymbolCache,
}

impl GatewayCore {
    pub fn new(exchange: &ExchangeConfig, gateway: &GatewayConfig) -> Arc<Self> {
        let settings = |market: Market, base_url: &str, agent_code: &str| ClientSettings {
            market,
            base_url: base_url.to_string(),
            agent_code: agent_code.to_string(),
            timeout: exchange.http_timeout(),
        };
        let ttl = chrono::Duration::seconds(gateway.symbol_cache_ttl_secs as i64);

        Arc::new(Self {
            exchange: exchange.clone(),
            order_timeout: Duration::from_secs(gateway.order_call_timeout_secs),
            quote_timeout: Duration::from_secs(gateway.quote_call_timeout_secs),
            spot_pool: ClientPool::new(
                settings(Market::Spot, exchange.spot_base_url(), &exchange.spot_agent_code),
                gateway.pool_max_idle,
            ),
            futures_pool: ClientPool::new(
                settings(
                    Market::Futures,
                    exchange.futures_base_url(),
                    &exchange.futures_agent_code,
                ),
                gateway.pool_max_idle,
            ),
            limiter: RateLimiter::new(
                gateway.rate_limit,
                Duration::from_secs(gateway.rate_window_secs),
            ),
            spot_symbols: SymbolCache::new(ttl),
            futures_symbols: SymbolCache::new(ttl),
        })
    }

    fn pool(&self, market: Market) -> &Arc<ClientPool> {
        match market {
            Market::Spot => &self.spot_pool,
            Market::Futures => &self.futures_pool,
        }
    }

    fn symbols(&self, market: Market) -> &SymbolCache {
        match market {
            Market::Spot => &self.spot_symbols,
            Market::Futures => &self.futures_symbols,
        }
    }
}

/// Timeout class of a call
#[derive(Debug, Clone, Copy)]
enum CallKind {
    /// Account, order and leverage calls
    Order,
    /// Price, depth and server time
    Quote,
}

/// Gateway bound to one user's credentials, or to none for public data.
#[derive(Clone)]
pub struct BinanceGateway {
    core: Arc<GatewayCore>,
    user_id: Option<i64>,
    signer: Option<RequestSigner>,
}

impl std::fmt::Debug for BinanceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceGateway")
            .field("user_id", &self.user_id)
            .field("signer", &self.signer)
            .finish()
    }
}

impl BinanceGateway {
    pub fn public(core: Arc<GatewayCore>) -> Self {
        Self {
            core,
            user_id: None,
            signer: None,
        }
    }

    pub fn for_user(core: Arc<GatewayCore>, user_id: i64, credentials: ApiCredentials) -> Self {
        Self {
            core,
            user_id: Some(user_id),
            signer: Some(RequestSigner::new(credentials)),
        }
    }

    /// Gateway for a user whose credentials could not be resolved
    pub fn unauthenticated(core: Arc<GatewayCore>, user_id: i64) -> Self {
        Self {
            core,
            user_id: Some(user_id),
            signer: None,
        }
    }

    fn call_timeout(&self, kind: CallKind) -> Duration {
        match kind {
            CallKind::Order => self.core.order_timeout,
            CallKind::Quote => self.core.quote_timeout,
        }
    }

    fn signer(&self) -> Result<&RequestSigner> {
        self.signer
            .as_ref()
            .ok_or(EngineError::CredentialsNotConfigured(self.user_id.unwrap_or_default()))
    }

    /// Inject the agent code, sign if needed, send and decode the JSON body.
    async fn send(
        &self,
        market: Market,
        parts: RequestParts,
        signed: Option<u64>,
        kind: CallKind,
    ) -> Result<Value> {
        let client = self.core.pool(market).acquire()?;
        let mut parts = inject_agent_code(&parts, client.agent_code());

        let mut headers = None;
        if let Some(recv_window) = signed {
            let signer = self.signer()?;
            parts = signer.sign_request(parts, recv_window, timestamp_ms())?;
            headers = Some(signer.headers()?);
        }

        let mut url = format!("{}{}", client.base_url(), parts.path);
        let query = parts.query_string();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let mut request = client.request(parts.method.clone(), &url);
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        if let Some(content_type) = parts.content_type() {
            request = request
                .header(CONTENT_TYPE, content_type)
                .body(parts.body_string());
        }

        let timeout = self.call_timeout(kind);
        let method = parts.method.clone();
        let path = parts.path.clone();
        let exchange = async move {
            let response = request.send().await.map_err(|e| classify_transport(&e))?;
            let status = response.status();
            let text = response.text().await.map_err(|e| classify_transport(&e))?;
            if !status.is_success() {
                return Err(classify_response(status, &text));
            }
            Ok(text)
        };

        let text = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                debug!(user_id = ?self.user_id, %method, %path, kind = e.kind(), "exchange call failed");
                return Err(e.into());
            }
            Err(_) => {
                return Err(ExchangeError::NetworkUnavailable(format!(
                    "{} {} timed out after {}s",
                    method,
                    path,
                    timeout.as_secs()
                ))
                .into())
            }
        };

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn check_rate(&self, key: &str) -> Result<()> {
        self.core.limiter.check(key)?;
        Ok(())
    }

    fn recv_window(&self) -> u64 {
        self.core.exchange.recv_window_ms
    }

    async fn refresh_symbols(&self, market: Market) -> Result<()> {
        let (key, path) = match market {
            Market::Spot => ("exchange_info", "/api/v3/exchangeInfo"),
            Market::Futures => ("futures_exchange_info", "/fapi/v1/exchangeInfo"),
        };
        self.check_rate(key)?;
        let body = self
            .send(market, RequestParts::get(path), None, CallKind::Order)
            .await?;
        let symbols = parse_exchange_info(&body);
        info!(%market, count = symbols.len(), "instrument rules refreshed");
        self.core.symbols(market).replace(symbols, Utc::now()).await;
        Ok(())
    }

    async fn account_with_window(&self, market: Market, recv_window: u64) -> Result<Value> {
        let (key, path) = match market {
            Market::Spot => ("account_info", "/api/v3/account"),
            Market::Futures => ("futures_account_info", "/fapi/v2/account"),
        };
        self.check_rate(key)?;
        self.send(market, RequestParts::get(path), Some(recv_window), CallKind::Order)
            .await
    }

    /// Diagnose connectivity and credentials; never fails.
    pub async fn diagnose_with(&self, credential_error: Option<String>) -> DiagnosisReport {
        let config = &self.core.exchange;
        let mut report = DiagnosisReport {
            user_id: self.user_id,
            credential_error,
            testnet: config.testnet,
            base_url: config.spot_base_url().to_string(),
            timeout_secs: config.http_timeout_secs,
            ..Default::default()
        };

        if let Some(signer) = &self.signer {
            let creds = signer.credentials();
            report.api_key_present = !creds.api_key().is_empty();
            report.secret_key_present = !creds.secret_key().is_empty();
            report.api_key_length = creds.api_key().len();
            report.secret_key_length = creds.secret_key().len();
            report.api_key_prefix = Some(format!("{}...", creds.key_prefix()));
            report.api_key_format_valid = has_expected_key_format(creds.api_key());
            report.secret_key_format_valid = has_expected_key_format(creds.secret_key());
        }

        if let Err(e) = self.core.pool(Market::Spot).acquire() {
            report.client_error = Some(e.to_string());
        }

        match self.server_time(Market::Spot).await {
            Ok(server_ms) => {
                let local_ms = timestamp_ms();
                report.server_time = DateTime::from_timestamp_millis(server_ms);
                report.local_time = DateTime::from_timestamp_millis(local_ms);
                report.time_diff_ms = Some(local_ms - server_ms);
                report.network_accessible = true;
            }
            Err(e) => {
                report.server_time_error = Some(e.to_string());
                report.network_accessible = false;
            }
        }

        if report.network_accessible && self.signer.is_some() {
            for window in probe_windows(config.recv_window_ms) {
                let outcome = self.account_with_window(Market::Spot, window).await;
                let success = outcome.is_ok();
                report.auth_probes.push(AuthProbe {
                    recv_window_ms: window,
                    success,
                    error: outcome.err().map(|e| e.to_string()),
                });
                if success {
                    report.working_recv_window = Some(window);
                    break;
                }
            }
        }

        let report = report.finish();
        info!(
            user_id = ?report.user_id,
            key_prefix = report.api_key_prefix.as_deref().unwrap_or("-"),
            network_accessible = report.network_accessible,
            working_recv_window = ?report.working_recv_window,
            "API connection diagnosis completed"
        );
        report
    }
}

fn decimal_at(value: &Value, key: &str) -> Decimal {
    match value.get(key) {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).unwrap_or_default(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn string_at(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn fmt_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Decode an order ack or status response (spot and futures shapes).
pub fn parse_order_report(body: &Value) -> OrderReport {
    let price = decimal_at(body, "price");
    let cumulative = if body.get("cummulativeQuoteQty").is_some() {
        decimal_at(body, "cummulativeQuoteQty")
    } else {
        decimal_at(body, "cumQuote")
    };
    OrderReport {
        exchange_order_id: string_at(body, "orderId"),
        client_order_id: string_at(body, "clientOrderId"),
        symbol: string_at(body, "symbol"),
        status: OrderStatus::from_exchange(&string_at(body, "status")),
        price: (!price.is_zero()).then_some(price),
        orig_qty: decimal_at(body, "origQty"),
        executed_qty: decimal_at(body, "executedQty"),
        cumulative_quote_qty: cumulative,
    }
}

/// Round an order to the instrument's step and tick sizes.
///
/// Rejects quantities that round to zero, fall below `min_qty` or exceed
/// `max_qty` before anything is sent.
pub fn round_order(
    info: &SymbolInfo,
    request: &OrderRequest,
) -> std::result::Result<OrderRequest, ExchangeError> {
    let quantity = info.round_quantity(request.quantity);
    if quantity <= Decimal::ZERO {
        return Err(ExchangeError::InvalidOrderParameters(format!(
            "{} quantity {} rounds to zero (step {})",
            request.symbol, request.quantity, info.step_size
        )));
    }
    if quantity < info.min_qty {
        return Err(ExchangeError::InvalidOrderParameters(format!(
            "{} quantity {} below minimum {}",
            request.symbol, quantity, info.min_qty
        )));
    }
    if quantity > info.max_qty {
        return Err(ExchangeError::InvalidOrderParameters(format!(
            "{} quantity {} above maximum {}",
            request.symbol, quantity, info.max_qty
        )));
    }

    let mut rounded = request.clone();
    rounded.quantity = quantity;
    rounded.price = request.price.map(|p| info.round_price(p));
    rounded.stop_price = request.stop_price.map(|p| info.round_price(p));
    Ok(rounded)
}

fn order_parts(request: &OrderRequest) -> RequestParts {
    let path = match request.market {
        Market::Spot => "/api/v3/order",
        Market::Futures => "/fapi/v1/order",
    };
    let mut parts = RequestParts::post(path)
        .form_param("symbol", &request.symbol)
        .form_param("side", request.side.as_str())
        .form_param("type", request.order_type.as_str())
        .form_param("quantity", fmt_decimal(request.quantity))
        .form_param("newClientOrderId", &request.client_order_id);

    if let Some(price) = request.price {
        parts = parts.form_param("price", fmt_decimal(price));
    }
    if let Some(stop_price) = request.stop_price {
        parts = parts.form_param("stopPrice", fmt_decimal(stop_price));
    }
    if let Some(tif) = request.time_in_force {
        parts = parts.form_param("timeInForce", tif.as_str());
    }

    match request.market {
        Market::Spot => parts.form_param("newOrderRespType", "RESULT"),
        Market::Futures => {
            let position_side = request.position_side.unwrap_or(PositionSide::Both);
            parts = parts.form_param("positionSide", position_side.as_str());
            // hedge mode rejects reduceOnly; the position side already implies it
            if request.reduce_only && position_side == PositionSide::Both {
                parts = parts.form_param("reduceOnly", "true");
            }
            parts
        }
    }
}

fn is_no_change(err: &EngineError) -> bool {
    match err {
        EngineError::Exchange(ExchangeError::Exchange { code, message }) => {
            *code == NO_CHANGE_CODE || message.contains("No need to change")
        }
        EngineError::Exchange(other) => other.to_string().contains("No need to change"),
        _ => false,
    }
}

fn parse_position(user_id: i64, raw: &Value, now: DateTime<Utc>) -> Option<Position> {
    let position_amt = decimal_at(raw, "positionAmt");
    if position_amt.is_zero() {
        return None;
    }
    Some(Position {
        user_id,
        symbol: string_at(raw, "symbol"),
        position_side: PositionSide::from_str(&string_at(raw, "positionSide"))
            .unwrap_or(PositionSide::Both),
        position_amt,
        entry_price: decimal_at(raw, "entryPrice"),
        mark_price: decimal_at(raw, "markPrice"),
        unrealized_pnl: decimal_at(raw, "unRealizedProfit"),
        liquidation_price: decimal_at(raw, "liquidationPrice"),
        leverage: string_at(raw, "leverage").parse().unwrap_or(1),
        max_notional: decimal_at(raw, "maxNotionalValue"),
        margin_type: MarginType::from_str(&string_at(raw, "marginType"))
            .unwrap_or(MarginType::Crossed),
        isolated_margin: decimal_at(raw, "isolatedMargin"),
        updated_at: now,
    })
}

fn parse_account(market: Market, body: &Value) -> AccountSnapshot {
    let can_trade = body.get("canTrade").and_then(Value::as_bool).unwrap_or(false);
    let balances = match market {
        Market::Spot => body
            .get("balances")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|b| Balance {
                asset: string_at(b, "asset"),
                free: decimal_at(b, "free"),
                locked: decimal_at(b, "locked"),
            })
            .collect(),
        Market::Futures => body
            .get("assets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|b| {
                let free = decimal_at(b, "availableBalance");
                let wallet = decimal_at(b, "walletBalance");
                Balance {
                    asset: string_at(b, "asset"),
                    free,
                    locked: (wallet - free).max(Decimal::ZERO),
                }
            })
            .collect(),
    };
    AccountSnapshot {
        can_trade,
        balances,
    }
}

fn market_paths(market: Market) -> (&'static str, &'static str) {
    match market {
        Market::Spot => ("", "/api/v3"),
        Market::Futures => ("futures_", "/fapi/v1"),
    }
}

#[async_trait]
impl ExchangeApi for BinanceGateway {
    fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    async fn price(&self, market: Market, symbol: &str) -> Result<Decimal> {
        let (prefix, base) = market_paths(market);
        self.check_rate(&format!("{}price_{}", prefix, symbol))?;
        let parts =
            RequestParts::get(&format!("{}/ticker/price", base)).query_param("symbol", symbol);
        let body = self.send(market, parts, None, CallKind::Quote).await?;
        let price = decimal_at(&body, "price");
        if price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidSymbol(format!("no price for {}", symbol)).into());
        }
        Ok(price)
    }

    async fn depth(&self, market: Market, symbol: &str) -> Result<BookTop> {
        let (prefix, base) = market_paths(market);
        self.check_rate(&format!("{}depth", prefix))?;
        let parts = RequestParts::get(&format!("{}/depth", base))
            .query_param("symbol", symbol)
            .query_param("limit", 5);
        let body = self.send(market, parts, None, CallKind::Quote).await?;

        let best = |side: &str| -> Option<Decimal> {
            body.get(side)?
                .as_array()?
                .first()?
                .as_array()?
                .first()?
                .as_str()
                .and_then(|p| Decimal::from_str(p).ok())
        };
        Ok(BookTop {
            best_bid: best("bids"),
            best_ask: best("asks"),
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReport> {
        let info = self.symbol_info(request.market, &request.symbol).await?;
        let request = round_order(&info, request)?;

        let key = match request.market {
            Market::Spot => "create_order",
            Market::Futures => "create_futures_order",
        };
        self.check_rate(key)?;

        let result = self
            .send(
                request.market,
                order_parts(&request),
                Some(self.recv_window()),
                CallKind::Order,
            )
            .await;

        match result {
            Ok(body) => {
                let mut report = parse_order_report(&body);
                if report.client_order_id.is_empty() {
                    report.client_order_id = request.client_order_id.clone();
                }
                info!(
                    user_id = ?self.user_id,
                    market = %request.market,
                    symbol = %request.symbol,
                    side = request.side.as_str(),
                    order_type = request.order_type.as_str(),
                    quantity = %request.quantity,
                    price = ?request.price,
                    order_id = %report.exchange_order_id,
                    "order placed"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    user_id = ?self.user_id,
                    symbol = %request.symbol,
                    side = request.side.as_str(),
                    error = %e,
                    "order placement failed"
                );
                Err(e)
            }
        }
    }

    async fn cancel_order(
        &self,
        market: Market,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderReport> {
        let (key, path) = match market {
            Market::Spot => ("cancel_order", "/api/v3/order"),
            Market::Futures => ("cancel_futures_order", "/fapi/v1/order"),
        };
        self.check_rate(key)?;
        let parts = RequestParts::delete(path)
            .query_param("symbol", symbol)
            .query_param("orderId", exchange_order_id);
        let body = self
            .send(market, parts, Some(self.recv_window()), CallKind::Order)
            .await?;
        info!(user_id = ?self.user_id, %symbol, order_id = %exchange_order_id, "order canceled");
        Ok(parse_order_report(&body))
    }

    async fn query_order(
        &self,
        market: Market,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<OrderReport> {
        let (key, path) = match market {
            Market::Spot => ("order_status", "/api/v3/order"),
            Market::Futures => ("futures_order_status", "/fapi/v1/order"),
        };
        self.check_rate(key)?;
        let parts = RequestParts::get(path)
            .query_param("symbol", symbol)
            .query_param("orderId", exchange_order_id);
        let body = self
            .send(market, parts, Some(self.recv_window()), CallKind::Order)
            .await?;
        Ok(parse_order_report(&body))
    }

    async fn account(&self, market: Market) -> Result<AccountSnapshot> {
        let body = self.account_with_window(market, self.recv_window()).await?;
        Ok(parse_account(market, &body))
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        self.check_rate("futures_positions")?;
        let body = self
            .send(
                Market::Futures,
                RequestParts::get("/fapi/v2/positionRisk"),
                Some(self.recv_window()),
                CallKind::Order,
            )
            .await?;
        let user_id = self.user_id.unwrap_or_default();
        let now = Utc::now();
        Ok(body
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|raw| parse_position(user_id, raw, now))
            .collect())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        if !(MIN_LEVERAGE..=MAX_LEVERAGE).contains(&leverage) {
            return Err(EngineError::Validation(format!(
                "leverage {} outside {}..={}",
                leverage, MIN_LEVERAGE, MAX_LEVERAGE
            )));
        }
        self.check_rate("set_leverage")?;
        let parts = RequestParts::post("/fapi/v1/leverage")
            .form_param("symbol", symbol)
            .form_param("leverage", leverage);
        match self
            .send(Market::Futures, parts, Some(self.recv_window()), CallKind::Order)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_no_change(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<()> {
        self.check_rate("set_margin_type")?;
        let parts = RequestParts::post("/fapi/v1/marginType")
            .form_param("symbol", symbol)
            .form_param("marginType", margin_type.as_str());
        match self
            .send(Market::Futures, parts, Some(self.recv_window()), CallKind::Order)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_no_change(&e) => {
                debug!(%symbol, margin_type = margin_type.as_str(), "margin type already set");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn symbol_info(&self, market: Market, symbol: &str) -> Result<SymbolInfo> {
        let cache = self.core.symbols(market);
        if let Some(info) = cache.get(symbol, Utc::now()).await {
            return Ok(info);
        }

        self.refresh_symbols(market).await?;
        cache
            .get(symbol, Utc::now())
            .await
            .ok_or_else(|| ExchangeError::InvalidSymbol(format!("{} ({})", symbol, market)).into())
    }

    async fn server_time(&self, market: Market) -> Result<i64> {
        let (_, base) = market_paths(market);
        self.check_rate("server_time")?;
        let body = self
            .send(
                market,
                RequestParts::get(&format!("{}/time", base)),
                None,
                CallKind::Quote,
            )
            .await?;
        body.get("serverTime")
            .and_then(Value::as_i64)
            .ok_or_else(|| EngineError::Internal("serverTime missing from response".to_string()))
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<WithdrawReceipt> {
        self.check_rate("withdraw")?;
        let mut parts = RequestParts::post("/sapi/v1/capital/withdraw/apply")
            .form_param("coin", &request.asset)
            .form_param("address", &request.address)
            .form_param("amount", fmt_decimal(request.amount));
        if let Some(network) = &request.network {
            parts = parts.form_param("network", network);
        }
        let body = self
            .send(Market::Spot, parts, Some(self.recv_window()), CallKind::Order)
            .await?;
        Ok(WithdrawReceipt {
            id: string_at(&body, "id"),
        })
    }

    async fn diagnose(&self) -> Result<DiagnosisReport> {
        Ok(self.diagnose_with(None).await)
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.account(Market::Spot).await?;

        if let Err(e) = self.account(Market::Futures).await {
            if self.core.exchange.testnet {
                warn!(user_id = ?self.user_id, error = %e, "futures account check failed on testnet");
            } else {
                return Err(e);
            }
        }
        Ok(())
    }
}
