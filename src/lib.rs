//! Flowgate - OpenAI-compatible gateway for Flow image and video generation
//!
//! This library pools backend accounts, keeps their access tokens fresh,
//! solves generation challenges in a shared headless browser and exposes the
//! result as a chat completions API.

pub mod captcha;
pub mod config;
pub mod error;
pub mod flow;
pub mod generation;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod store;
pub mod streaming;
pub mod tokens;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::info;

pub use crate::captcha::{BrowserLauncher, CaptchaBroker, ChromiumLauncher};
pub use crate::config::Config;
pub use crate::error::{AppError, AppResult};
pub use crate::flow::FlowApiClient;
pub use crate::generation::GenerationService;
pub use crate::proxy::ProxyManager;
pub use crate::store::{Database, InMemoryStore, RedisStore};
pub use crate::tokens::{TokenManager, TokenRefresher};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Database>,
    pub proxies: Arc<ProxyManager>,
    pub broker: Arc<CaptchaBroker>,
    pub flow: Arc<FlowApiClient>,
    pub tokens: Arc<TokenManager>,
    pub generation: Arc<GenerationService>,
    pub start_time: Instant,
}

impl AppState {
    /// Create a new application state
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn Database> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::connect(url).await?),
            None => {
                info!("REDIS_URL not set, using in-memory credential store");
                Arc::new(InMemoryStore::new())
            }
        };

        Ok(Self::assemble(config, store, Arc::new(ChromiumLauncher)))
    }

    /// Create a new application state for testing with an injected store and
    /// browser launcher
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_for_testing(
        config: Config,
        store: Arc<dyn Database>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self::assemble(config, store, launcher)
    }

    fn assemble(config: Config, store: Arc<dyn Database>, launcher: Arc<dyn BrowserLauncher>) -> Self {
        let proxies = Arc::new(ProxyManager::new(store.clone()));
        let broker = Arc::new(CaptchaBroker::new(
            config.captcha.clone(),
            &config.labs_base_url,
            store.clone(),
            launcher,
        ));
        let flow = Arc::new(FlowApiClient::new(&config, proxies.clone(), broker.clone()));
        let tokens = Arc::new(TokenManager::new(
            store.clone(),
            flow.clone(),
            config.pool.clone(),
        ));
        let generation = Arc::new(GenerationService::new(tokens.clone(), flow.clone(), &config));

        Self {
            config,
            store,
            proxies,
            broker,
            flow,
            tokens,
            generation,
            start_time: Instant::now(),
        }
    }

    /// Release the browser and restore the captcha driver
    pub async fn shutdown(&self) {
        self.broker.close().await;
    }
}
