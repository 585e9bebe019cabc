use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

use crate::domain::{precision_of, SymbolInfo};

#[derive(Debug, Default)]
struct CacheInner {
    symbols: HashMap<String, SymbolInfo>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Instrument rules for one market, rebuilt wholesale on expiry.
#[derive(Debug)]
pub struct SymbolCache {
    ttl: Duration,
    inner: RwLock<CacheInner>,
}

impl SymbolCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Cached rules for `symbol`, `None` on miss or when the cache is stale.
    pub async fn get(&self, symbol: &str, now: DateTime<Utc>) -> Option<SymbolInfo> {
        let inner = self.inner.read().await;
        match inner.refreshed_at {
            Some(at) if now - at < self.ttl => inner.symbols.get(symbol).cloned(),
            _ => None,
        }
    }

    pub async fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read().await;
        matches!(inner.refreshed_at, Some(at) if now - at < self.ttl)
    }

    /// Replace every entry.
    pub async fn replace(&self, symbols: Vec<SymbolInfo>, now: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        inner.symbols = symbols
            .into_iter()
            .map(|info| (info.symbol.clone(), info))
            .collect();
        inner.refreshed_at = Some(now);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.symbols.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
    match value.get(key)? {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn u32_field(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).map(|n| n as u32)
}

/// Build instrument rules from an `exchangeInfo` response.
///
/// Only `TRADING` symbols are kept. Reads the `LOT_SIZE`, `PRICE_FILTER` and
/// `MIN_NOTIONAL`/`NOTIONAL` filters.
pub fn parse_exchange_info(body: &Value) -> Vec<SymbolInfo> {
    let Some(symbols) = body.get("symbols").and_then(Value::as_array) else {
        return Vec::new();
    };

    symbols
        .iter()
        .filter(|s| s.get("status").and_then(Value::as_str) == Some("TRADING"))
        .filter_map(|s| {
            let symbol = s.get("symbol")?.as_str()?.to_string();
            let mut info = SymbolInfo {
                symbol,
                base_asset: s
                    .get("baseAsset")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                quote_asset: s
                    .get("quoteAsset")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                min_qty: Decimal::ZERO,
                max_qty: Decimal::MAX,
                step_size: Decimal::ZERO,
                tick_size: Decimal::ZERO,
                min_notional: Decimal::ZERO,
                price_precision: 8,
                quantity_precision: 8,
            };

            let filters = s.get("filters").and_then(Value::as_array);
            for filter in filters.into_iter().flatten() {
                match filter.get("filterType").and_then(Value::as_str) {
                    Some("LOT_SIZE") => {
                        info.min_qty = decimal_field(filter, "minQty").unwrap_or(info.min_qty);
                        info.max_qty = decimal_field(filter, "maxQty")
                            .filter(|q| !q.is_zero())
                            .unwrap_or(info.max_qty);
                        info.step_size = decimal_field(filter, "stepSize").unwrap_or_default();
                    }
                    Some("PRICE_FILTER") => {
                        info.tick_size = decimal_field(filter, "tickSize").unwrap_or_default();
                    }
                    Some("MIN_NOTIONAL") | Some("NOTIONAL") => {
                        info.min_notional = decimal_field(filter, "minNotional")
                            .or_else(|| decimal_field(filter, "notional"))
                            .unwrap_or_default();
                    }
                    _ => {}
                }
            }

            // Futures responses declare precision explicitly
            info.price_precision = u32_field(s, "pricePrecision")
                .unwrap_or_else(|| precision_of(info.tick_size));
            info.quantity_precision = u32_field(s, "quantityPrecision")
                .unwrap_or_else(|| precision_of(info.step_size));

            Some(info)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn exchange_info() -> Value {
        json!({
            "symbols": [
                {
                    "symbol": "BTCUSDT",
                    "status": "TRADING",
                    "baseAsset": "BTC",
                    "quoteAsset": "USDT",
                    "filters": [
                        {"filterType": "PRICE_FILTER", "tickSize": "0.01000000"},
                        {"filterType": "LOT_SIZE", "minQty": "0.00001000", "maxQty": "9000.00000000", "stepSize": "0.00001000"},
                        {"filterType": "NOTIONAL", "minNotional": "5.00000000"}
                    ]
                },
                {
                    "symbol": "OLDUSDT",
                    "status": "BREAK",
                    "baseAsset": "OLD",
                    "quoteAsset": "USDT",
                    "filters": []
                }
            ]
        })
    }

    #[test]
    fn parses_trading_symbols_only() {
        let symbols = parse_exchange_info(&exchange_info());
        assert_eq!(symbols.len(), 1);

        let btc = &symbols[0];
        assert_eq!(btc.symbol, "BTCUSDT");
        assert_eq!(btc.min_qty, dec!(0.00001));
        assert_eq!(btc.max_qty, dec!(9000));
        assert_eq!(btc.tick_size, dec!(0.01));
        assert_eq!(btc.min_notional, dec!(5));
        assert_eq!(btc.price_precision, 2);
        assert_eq!(btc.quantity_precision, 5);
    }

    #[test]
    fn futures_precision_fields_win() {
        let body = json!({
            "symbols": [{
                "symbol": "ETHUSDT",
                "status": "TRADING",
                "baseAsset": "ETH",
                "quoteAsset": "USDT",
                "pricePrecision": 2,
                "quantityPrecision": 3,
                "filters": [
                    {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "10000", "stepSize": "0.001"},
                    {"filterType": "MIN_NOTIONAL", "notional": "20"}
                ]
            }]
        });
        let symbols = parse_exchange_info(&body);
        assert_eq!(symbols[0].quantity_precision, 3);
        assert_eq!(symbols[0].price_precision, 2);
        assert_eq!(symbols[0].min_notional, dec!(20));
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let cache = SymbolCache::new(Duration::hours(24));
        let t0 = Utc::now();
        assert!(cache.get("BTCUSDT", t0).await.is_none());

        cache.replace(parse_exchange_info(&exchange_info()), t0).await;
        assert!(cache.get("BTCUSDT", t0 + Duration::hours(1)).await.is_some());
        assert!(cache.get("OLDUSDT", t0).await.is_none());
        assert!(cache.get("BTCUSDT", t0 + Duration::hours(25)).await.is_none());
        assert!(!cache.is_fresh(t0 + Duration::hours(25)).await);
    }

    #[tokio::test]
    async fn replace_is_wholesale() {
        let cache = SymbolCache::new(Duration::hours(24));
        let now = Utc::now();
        cache.replace(parse_exchange_info(&exchange_info()), now).await;
        cache.replace(Vec::new(), now).await;
        assert!(cache.is_empty().await);
    }
}
