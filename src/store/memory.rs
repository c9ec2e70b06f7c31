//! In-memory credential store
//!
//! Stores everything in process memory. Used by the test suite and when no
//! Redis URL is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    CaptchaConfig, Credential, CredentialStats, CredentialUpdate, Database, ProxyConfig,
};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct StoreData {
    credentials: HashMap<String, Credential>,
    stats: HashMap<String, CredentialStats>,
    captcha: CaptchaConfig,
    proxy: ProxyConfig,
}

/// In-memory store
///
/// Uses an async RwLock so concurrent readers never block each other.
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<StoreData>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with credentials
    pub fn with_credentials(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let credentials = credentials
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        Self {
            data: RwLock::new(StoreData {
                credentials,
                ..StoreData::default()
            }),
        }
    }
}

#[async_trait]
impl Database for InMemoryStore {
    async fn get_all_credentials(&self) -> AppResult<Vec<Credential>> {
        let data = self.data.read().await;
        let mut all: Vec<Credential> = data.credentials.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn get_credential(&self, id: &str) -> AppResult<Option<Credential>> {
        Ok(self.data.read().await.credentials.get(id).cloned())
    }

    async fn insert_credential(&self, credential: &Credential) -> AppResult<()> {
        let mut data = self.data.write().await;
        data.credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn update_credential(
        &self,
        id: &str,
        update: &CredentialUpdate,
    ) -> AppResult<Credential> {
        let mut data = self.data.write().await;
        let credential = data
            .credentials
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("credential {}", id)))?;
        update.apply(credential);
        Ok(credential.clone())
    }

    async fn delete_credential(&self, id: &str) -> AppResult<()> {
        let mut data = self.data.write().await;
        data.credentials.remove(id);
        data.stats.remove(id);
        Ok(())
    }

    async fn get_credential_stats(&self, id: &str) -> AppResult<CredentialStats> {
        Ok(self
            .data
            .read()
            .await
            .stats
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_credential_stats(&self, id: &str, stats: &CredentialStats) -> AppResult<()> {
        self.data
            .write()
            .await
            .stats
            .insert(id.to_string(), stats.clone());
        Ok(())
    }

    async fn get_captcha_config(&self) -> AppResult<CaptchaConfig> {
        Ok(self.data.read().await.captcha.clone())
    }

    async fn set_captcha_config(&self, config: &CaptchaConfig) -> AppResult<()> {
        self.data.write().await.captcha = config.clone();
        Ok(())
    }

    async fn get_proxy_config(&self) -> AppResult<ProxyConfig> {
        Ok(self.data.read().await.proxy.clone())
    }

    async fn set_proxy_config(&self, config: &ProxyConfig) -> AppResult<()> {
        self.data.write().await.proxy = config.clone();
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
