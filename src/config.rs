use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Route spot and futures calls to the exchange testnets
    #[serde(default)]
    pub testnet: bool,
    /// Override for the spot REST base URL
    #[serde(default)]
    pub spot_base_url: Option<String>,
    /// Override for the futures REST base URL
    #[serde(default)]
    pub futures_base_url: Option<String>,
    /// Partner code attached to spot requests
    #[serde(default = "default_spot_agent_code")]
    pub spot_agent_code: String,
    /// Partner code attached to futures requests
    #[serde(default = "default_futures_agent_code")]
    pub futures_agent_code: String,
    /// recvWindow sent with signed requests (milliseconds)
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// HTTP client timeout (seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_spot_agent_code() -> String {
    "JW9QZKMK".to_string()
}

fn default_futures_agent_code() -> String {
    "mNY8WNSQ".to_string()
}

fn default_recv_window_ms() -> u64 {
    60_000
}

fn default_http_timeout_secs() -> u64 {
    30
}

pub const SPOT_MAINNET_URL: &str = "https://api.binance.com";
pub const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";
pub const FUTURES_MAINNET_URL: &str = "https://fapi.binance.com";
pub const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

impl ExchangeConfig {
    pub fn spot_base_url(&self) -> &str {
        match (&self.spot_base_url, self.testnet) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, true) => SPOT_TESTNET_URL,
            (None, false) => SPOT_MAINNET_URL,
        }
    }

    pub fn futures_base_url(&self) -> &str {
        match (&self.futures_base_url, self.testnet) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, true) => FUTURES_TESTNET_URL,
            (None, false) => FUTURES_MAINNET_URL,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            spot_base_url: None,
            futures_base_url: None,
            spot_agent_code: default_spot_agent_code(),
            futures_agent_code: default_futures_agent_code(),
            recv_window_ms: default_recv_window_ms(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Calls allowed per key within the rate window
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Rate window length (seconds)
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    /// Instrument rule freshness (seconds)
    #[serde(default = "default_symbol_ttl_secs")]
    pub symbol_cache_ttl_secs: u64,
    /// Idle clients kept per market
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,
    /// Timeout for account, order and leverage calls (seconds)
    #[serde(default = "default_order_call_timeout_secs")]
    pub order_call_timeout_secs: u64,
    /// Timeout for price, depth and server-time calls (seconds)
    #[serde(default = "default_quote_call_timeout_secs")]
    pub quote_call_timeout_secs: u64,
}

fn default_rate_limit() -> usize {
    1200
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_symbol_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_pool_max_idle() -> usize {
    8
}

fn default_order_call_timeout_secs() -> u64 {
    30
}

fn default_quote_call_timeout_secs() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window_secs(),
            symbol_cache_ttl_secs: default_symbol_ttl_secs(),
            pool_max_idle: default_pool_max_idle(),
            order_call_timeout_secs: default_order_call_timeout_secs(),
            quote_call_timeout_secs: default_quote_call_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// How long a tick may hold a strategy (seconds)
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Delay before stop-loss / take-profit placement (seconds)
    #[serde(default = "default_protective_delay_secs")]
    pub protective_order_delay_secs: u64,
}

fn default_lease_secs() -> u64 {
    120
}

fn default_protective_delay_secs() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            protective_order_delay_secs: default_protective_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_price_interval_secs")]
    pub price_interval_secs: u64,
    #[serde(default = "default_order_interval_secs")]
    pub order_interval_secs: u64,
    #[serde(default = "default_withdrawal_interval_secs")]
    pub withdrawal_interval_secs: u64,
    #[serde(default = "default_dual_interval_secs")]
    pub dual_investment_interval_secs: u64,
    #[serde(default = "default_futures_interval_secs")]
    pub futures_interval_secs: u64,
    /// Upper bound for a single strategy/order/rule evaluation (seconds)
    #[serde(default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,
    /// Open orders reconciled per tick
    #[serde(default = "default_reconcile_batch")]
    pub reconcile_batch: i64,
    /// Symbols refreshed by the price loop
    #[serde(default = "default_price_symbols")]
    pub price_symbols: Vec<String>,
    /// Time allowed for background tasks to drain on shutdown (seconds)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_price_interval_secs() -> u64 {
    30
}

fn default_order_interval_secs() -> u64 {
    30
}

fn default_withdrawal_interval_secs() -> u64 {
    5 * 60
}

fn default_dual_interval_secs() -> u64 {
    60 * 60
}

fn default_futures_interval_secs() -> u64 {
    60
}

fn default_item_timeout_secs() -> u64 {
    25
}

fn default_reconcile_batch() -> i64 {
    200
}

fn default_price_symbols() -> Vec<String> {
    [
        "BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "DOTUSDT", "XRPUSDT", "LTCUSDT", "LINKUSDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl SchedulerConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            price_interval_secs: default_price_interval_secs(),
            order_interval_secs: default_order_interval_secs(),
            withdrawal_interval_secs: default_withdrawal_interval_secs(),
            dual_investment_interval_secs: default_dual_interval_secs(),
            futures_interval_secs: default_futures_interval_secs(),
            item_timeout_secs: default_item_timeout_secs(),
            reconcile_batch: default_reconcile_batch(),
            price_symbols: default_price_symbols(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/cctrade".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Global key pair, shared by the listed users.
#[derive(Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub user_ids: Vec<i64>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<set>"))
            .field("user_ids", &self.user_ids)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rotated log files
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific file, e.g. config/production.toml
            .add_source(
                File::from(config_dir.join(
                    std::env::var("CCTRADE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // CCTRADE__EXCHANGE__TESTNET=true, CCTRADE__DATABASE__URL=..., etc.
            .add_source(
                Environment::with_prefix("CCTRADE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.gateway.rate_limit == 0 {
            errors.push("gateway.rate_limit must be positive".to_string());
        }
        if self.gateway.rate_window_secs == 0 {
            errors.push("gateway.rate_window_secs must be positive".to_string());
        }
        if self.gateway.symbol_cache_ttl_secs == 0 {
            errors.push("gateway.symbol_cache_ttl_secs must be positive".to_string());
        }
        if self.exchange.recv_window_ms == 0 || self.exchange.recv_window_ms > 60_000 {
            errors.push("exchange.recv_window_ms must be within 1..=60000".to_string());
        }

        let intervals = [
            ("price_interval_secs", self.scheduler.price_interval_secs),
            ("order_interval_secs", self.scheduler.order_interval_secs),
            ("withdrawal_interval_secs", self.scheduler.withdrawal_interval_secs),
            (
                "dual_investment_interval_secs",
                self.scheduler.dual_investment_interval_secs,
            ),
            ("futures_interval_secs", self.scheduler.futures_interval_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                errors.push(format!("scheduler.{name} must be positive"));
            } else if self.scheduler.item_timeout_secs >= secs && name != "price_interval_secs" {
                errors.push(format!(
                    "scheduler.item_timeout_secs ({}) should be shorter than scheduler.{name} ({secs})",
                    self.scheduler.item_timeout_secs
                ));
            }
        }

        if self.engine.lease_secs <= self.scheduler.item_timeout_secs {
            errors.push(
                "engine.lease_secs should exceed scheduler.item_timeout_secs".to_string(),
            );
        }

        if self.credentials.api_key.is_some() != self.credentials.secret_key.is_some() {
            errors.push("credentials.api_key and credentials.secret_key go together".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.gateway.rate_limit, 1200);
        assert_eq!(cfg.scheduler.price_symbols.len(), 8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn testnet_switches_base_urls() {
        let mut exchange = ExchangeConfig::default();
        assert_eq!(exchange.spot_base_url(), SPOT_MAINNET_URL);
        assert_eq!(exchange.futures_base_url(), FUTURES_MAINNET_URL);

        exchange.testnet = true;
        assert_eq!(exchange.spot_base_url(), SPOT_TESTNET_URL);
        assert_eq!(exchange.futures_base_url(), FUTURES_TESTNET_URL);

        exchange.spot_base_url = Some("http://localhost:9000/".to_string());
        assert_eq!(exchange.spot_base_url(), "http://localhost:9000");
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut cfg = AppConfig::default();
        cfg.gateway.rate_limit = 0;
        cfg.scheduler.futures_interval_secs = 0;
        cfg.credentials.api_key = Some("k".to_string());

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn load_from_missing_dir_uses_defaults() {
        let cfg = AppConfig::load_from("/nonexistent/cctrade-config").unwrap();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.database.max_connections, 5);
    }

    #[test]
    fn credentials_debug_hides_keys() {
        let creds = CredentialsConfig {
            api_key: Some("abcdef123456".to_string()),
            secret_key: Some("topsecret".to_string()),
            user_ids: vec![1],
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("abcdef"));
        assert!(!rendered.contains("topsecret"));
    }
}
