use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::adapters::binance_rest::{BinanceGateway, GatewayCore};
use crate::config::AppConfig;
use crate::error::Result;
use crate::signing::CredentialResolver;

use super::diagnosis::DiagnosisReport;
use super::ExchangeApi;

/// Builds gateways bound to a user's credentials.
#[async_trait]
pub trait ExchangeProvider: Send + Sync {
    /// Gateway signing as `user_id`; `CredentialsNotConfigured` without keys.
    async fn for_user(&self, user_id: i64) -> Result<Arc<dyn ExchangeApi>>;

    /// Unauthenticated gateway for market data
    fn public(&self) -> Arc<dyn ExchangeApi>;

    /// Connectivity report for `user_id`; never fails.
    async fn diagnose(&self, user_id: i64) -> DiagnosisReport;

    async fn users_with_credentials(&self) -> Result<Vec<i64>>;
}

/// Provider for the Binance REST gateway.
///
/// All gateways share one [`GatewayCore`], so the rate limiter, client pools
/// and instrument rules are process-wide.
pub struct BinanceProvider {
    core: Arc<GatewayCore>,
    resolver: Arc<dyn CredentialResolver>,
    gateways: DashMap<i64, Arc<BinanceGateway>>,
    public: Arc<BinanceGateway>,
}

impl BinanceProvider {
    pub fn new(config: &AppConfig, resolver: Arc<dyn CredentialResolver>) -> Self {
        let core = GatewayCore::new(&config.exchange, &config.gateway);
        let public = Arc::new(BinanceGateway::public(Arc::clone(&core)));
        Self {
            core,
            resolver,
            gateways: DashMap::new(),
            public,
        }
    }

    /// Drop a cached gateway, e.g. after the user's keys changed.
    pub fn invalidate(&self, user_id: i64) {
        self.gateways.remove(&user_id);
    }

    async fn gateway(&self, user_id: i64) -> Result<Arc<BinanceGateway>> {
        if let Some(existing) = self.gateways.get(&user_id) {
            return Ok(Arc::clone(existing.value()));
        }

        let credentials = self.resolver.resolve(user_id).await?;
        debug!(user_id, key_prefix = %credentials.key_prefix(), "building user gateway");
        let gateway = Arc::new(BinanceGateway::for_user(
            Arc::clone(&self.core),
            user_id,
            credentials,
        ));
        let entry = self.gateways.entry(user_id).or_insert(gateway);
        Ok(Arc::clone(entry.value()))
    }
}

#[async_trait]
impl ExchangeProvider for BinanceProvider {
    async fn for_user(&self, user_id: i64) -> Result<Arc<dyn ExchangeApi>> {
        let gateway: Arc<dyn ExchangeApi> = self.gateway(user_id).await?;
        Ok(gateway)
    }

    fn public(&self) -> Arc<dyn ExchangeApi> {
        self.public.clone()
    }

    async fn diagnose(&self, user_id: i64) -> DiagnosisReport {
        match self.gateway(user_id).await {
            Ok(gateway) => gateway.diagnose_with(None).await,
            Err(e) => {
                BinanceGateway::unauthenticated(Arc::clone(&self.core), user_id)
                    .diagnose_with(Some(e.to_string()))
                    .await
            }
        }
    }

    async fn users_with_credentials(&self) -> Result<Vec<i64>> {
        self.resolver.users_with_credentials().await
    }
}
