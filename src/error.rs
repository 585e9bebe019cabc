use thiserror::Error;

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Exchange errors, already classified
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    // Strategy errors
    #[error("Strategy not found: {0}")]
    StrategyNotFound(i64),

    #[error("Strategy {0} is claimed by another tick")]
    LeaseHeld(i64),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Credential errors
    #[error("API credentials not configured for user {0}")]
    CredentialsNotConfigured(i64),

    #[error("Authentication error: {0}")]
    Auth(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the failure is the caller's fault (bad input, missing keys,
    /// business rule) rather than an exchange/network/server problem.
    pub fn is_client_error(&self) -> bool {
        match self {
            EngineError::Validation(_)
            | EngineError::CredentialsNotConfigured(_)
            | EngineError::Auth(_)
            | EngineError::StrategyNotFound(_)
            | EngineError::LeaseHeld(_) => true,
            EngineError::Exchange(e) => e.is_client_error(),
            _ => false,
        }
    }

    /// The exchange would refuse this order as sized or priced; resending it
    /// unchanged cannot succeed.
    pub fn is_invalid_order(&self) -> bool {
        matches!(
            self,
            EngineError::Exchange(ExchangeError::InvalidOrderParameters(_))
        )
    }
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Exchange failures mapped onto a fixed taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("invalid API credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid order parameters: {0}")]
    InvalidOrderParameters(String),

    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("permission denied (IP whitelist or key activation): {0}")]
    PermissionDenied(String),

    #[error("timestamp outside recvWindow, check clock sync: {0}")]
    TimestampSkew(String),

    #[error("signature rejected: {0}")]
    SignatureInvalid(String),

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("exchange error {code}: {message}")]
    Exchange { code: i64, message: String },
}

impl ExchangeError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExchangeError::InvalidCredentials(_)
                | ExchangeError::InvalidSymbol(_)
                | ExchangeError::InvalidOrderParameters(_)
                | ExchangeError::InsufficientBalance(_)
                | ExchangeError::OrderNotFound(_)
                | ExchangeError::PermissionDenied(_)
                | ExchangeError::SignatureInvalid(_)
        )
    }

    /// Stable short name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::InvalidCredentials(_) => "invalid_credentials",
            ExchangeError::InvalidSymbol(_) => "invalid_symbol",
            ExchangeError::InvalidOrderParameters(_) => "invalid_order_parameters",
            ExchangeError::RateLimitExceeded(_) => "rate_limit_exceeded",
            ExchangeError::InsufficientBalance(_) => "insufficient_balance",
            ExchangeError::OrderNotFound(_) => "order_not_found",
            ExchangeError::PermissionDenied(_) => "permission_denied",
            ExchangeError::TimestampSkew(_) => "timestamp_skew",
            ExchangeError::SignatureInvalid(_) => "signature_invalid",
            ExchangeError::NetworkUnavailable(_) => "network_unavailable",
            ExchangeError::Exchange { .. } => "exchange_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_separated_from_server_errors() {
        assert!(EngineError::Validation("bad layers".into()).is_client_error());
        assert!(EngineError::CredentialsNotConfigured(7).is_client_error());
        assert!(
            EngineError::Exchange(ExchangeError::InsufficientBalance("USDT".into()))
                .is_client_error()
        );
        assert!(
            !EngineError::Exchange(ExchangeError::NetworkUnavailable("timeout".into()))
                .is_client_error()
        );
        assert!(!EngineError::Internal("boom".into()).is_client_error());
    }

    #[test]
    fn only_rejected_parameters_count_as_invalid_orders() {
        let rejected = ExchangeError::InvalidOrderParameters("rounds to zero".into());
        assert!(EngineError::Exchange(rejected).is_invalid_order());
        assert!(
            !EngineError::Exchange(ExchangeError::NetworkUnavailable("timeout".into()))
                .is_invalid_order()
        );
        assert!(!EngineError::Validation("bad layers".into()).is_invalid_order());
    }
}
