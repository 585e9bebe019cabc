//! Where per-user API keys come from.
//!
//! How keys are stored at rest is outside this crate; the engine only sees
//! the [`CredentialResolver`] seam.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::CredentialsConfig;
use crate::error::{EngineError, Result};

use super::hmac::ApiCredentials;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Key pair for `user_id`, or `CredentialsNotConfigured`.
    async fn resolve(&self, user_id: i64) -> Result<ApiCredentials>;

    /// Users that currently have a key pair
    async fn users_with_credentials(&self) -> Result<Vec<i64>>;
}

/// In-memory key map
#[derive(Default)]
pub struct StaticCredentials {
    keys: RwLock<HashMap<i64, ApiCredentials>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: i64, credentials: ApiCredentials) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(user_id, credentials);
    }

    pub fn remove(&self, user_id: i64) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.remove(&user_id);
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("StaticCredentials")
            .field("users", &keys.len())
            .finish()
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, user_id: i64) -> Result<ApiCredentials> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(&user_id)
            .filter(|c| c.is_complete())
            .cloned()
            .ok_or(EngineError::CredentialsNotConfigured(user_id))
    }

    async fn users_with_credentials(&self) -> Result<Vec<i64>> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let mut users: Vec<i64> = keys
            .iter()
            .filter(|(_, c)| c.is_complete())
            .map(|(id, _)| *id)
            .collect();
        users.sort_unstable();
        Ok(users)
    }
}

/// One global key pair from configuration, shared by the configured users.
///
/// An empty `user_ids` list means every user resolves to the global pair.
#[derive(Debug)]
pub struct ConfigCredentials {
    credentials: Option<ApiCredentials>,
    user_ids: Vec<i64>,
}

impl ConfigCredentials {
    pub fn from_config(config: &CredentialsConfig) -> Self {
        let credentials = match (&config.api_key, &config.secret_key) {
            (Some(key), Some(secret)) => {
                Some(ApiCredentials::new(key.trim(), secret.trim())).filter(|c| c.is_complete())
            }
            _ => None,
        };
        Self {
            credentials,
            user_ids: config.user_ids.clone(),
        }
    }

    fn covers(&self, user_id: i64) -> bool {
        self.user_ids.is_empty() || self.user_ids.contains(&user_id)
    }
}

#[async_trait]
impl CredentialResolver for ConfigCredentials {
    async fn resolve(&self, user_id: i64) -> Result<ApiCredentials> {
        match &self.credentials {
            Some(creds) if self.covers(user_id) => Ok(creds.clone()),
            _ => Err(EngineError::CredentialsNotConfigured(user_id)),
        }
    }

    async fn users_with_credentials(&self) -> Result<Vec<i64>> {
        if self.credentials.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.user_ids.clone())
    }
}
