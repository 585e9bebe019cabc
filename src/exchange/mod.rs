pub mod diagnosis;
pub mod errors;
pub mod factory;
pub mod pool;
pub mod rate_limit;
pub mod symbols;
mod traits;

pub use diagnosis::{AuthProbe, DiagnosisReport};
pub use errors::{classify_code, classify_response, classify_text, extract_code};
pub use factory::{BinanceProvider, ExchangeProvider};
pub use pool::{ClientPool, ClientSettings, PooledClient};
pub use rate_limit::RateLimiter;
pub use symbols::{parse_exchange_info, SymbolCache};
pub use traits::{reference_price, ExchangeApi};
