//! Credential store
//!
//! The [`Database`] trait is the contract the token manager, proxy manager
//! and captcha broker consume. Two backends are provided: Redis for
//! deployments and an in-memory map for tests and single-process setups.

pub mod memory;
pub mod models;
pub mod redis;

use async_trait::async_trait;

use crate::error::AppResult;

pub use memory::InMemoryStore;
pub use models::{
    token_prefix, CaptchaConfig, Capability, Credential, CredentialStats, CredentialUpdate,
    ProxyConfig, Tier,
};
pub use self::redis::RedisStore;

/// Persistence contract for credentials, their stats, and runtime settings
#[async_trait]
pub trait Database: Send + Sync {
    async fn get_all_credentials(&self) -> AppResult<Vec<Credential>>;

    async fn get_credential(&self, id: &str) -> AppResult<Option<Credential>>;

    async fn insert_credential(&self, credential: &Credential) -> AppResult<()>;

    /// Apply a partial update and return the stored result.
    ///
    /// Fails with `NotFound` if the credential does not exist.
    async fn update_credential(&self, id: &str, update: &CredentialUpdate)
        -> AppResult<Credential>;

    async fn delete_credential(&self, id: &str) -> AppResult<()>;

    /// Stats for a credential; a credential never used has default stats
    async fn get_credential_stats(&self, id: &str) -> AppResult<CredentialStats>;

    async fn update_credential_stats(&self, id: &str, stats: &CredentialStats) -> AppResult<()>;

    async fn get_captcha_config(&self) -> AppResult<CaptchaConfig>;

    async fn set_captcha_config(&self, config: &CaptchaConfig) -> AppResult<()>;

    async fn get_proxy_config(&self) -> AppResult<ProxyConfig>;

    async fn set_proxy_config(&self, config: &ProxyConfig) -> AppResult<()>;

    /// Connectivity probe for health checks
    async fn ping(&self) -> AppResult<()>;

    /// Backend name for health output
    fn name(&self) -> &'static str;
}
