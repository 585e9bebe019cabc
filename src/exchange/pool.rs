//! Reusable HTTP clients per market.
//!
//! A guard is handed out without any I/O; dropping it returns the client to
//! the idle list unless the list is already full.

use reqwest::Client;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::domain::Market;
use crate::error::{EngineError, Result};

/// Settings every client from a pool is built with
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub market: Market,
    pub base_url: String,
    pub agent_code: String,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct ClientPool {
    settings: ClientSettings,
    max_idle: usize,
    idle: Mutex<Vec<Client>>,
}

impl ClientPool {
    pub fn new(settings: ClientSettings, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            settings,
            max_idle,
            idle: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn build_client(&self) -> Result<Client> {
        Client::builder()
            .user_agent(concat!("cctrade/", env!("CARGO_PKG_VERSION")))
            .timeout(self.settings.timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build HTTP client: {}", e)))
    }

    /// Take an idle client or build a new one.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledClient> {
        let reused = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.pop()
        };
        let client = match reused {
            Some(client) => client,
            None => {
                debug!(market = %self.settings.market, "building new HTTP client");
                self.build_client()?
            }
        };
        Ok(PooledClient {
            client,
            pool: Arc::clone(self),
        })
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn release(&self, client: Client) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.max_idle {
            idle.push(client);
        }
    }
}

/// Client on loan from a [`ClientPool`]
pub struct PooledClient {
    client: Client,
    pool: Arc<ClientPool>,
}

impl PooledClient {
    pub fn base_url(&self) -> &str {
        &self.pool.settings.base_url
    }

    pub fn agent_code(&self) -> &str {
        &self.pool.settings.agent_code
    }

    pub fn timeout(&self) -> Duration {
        self.pool.settings.timeout
    }
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        // reqwest clients are handles; the clone shares the connection pool
        self.pool.release(self.client.clone());
    }
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("base_url", &self.pool.settings.base_url)
            .finish()
    }
}
