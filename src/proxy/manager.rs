//! Outbound proxy resolution for backend HTTP calls
//!
//! A credential bound to a dedicated proxy always uses it; otherwise the
//! global proxy applies. Disabled or empty configuration means direct
//! connections.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::url::ProxyUrl;
use crate::error::AppResult;
use crate::store::{Database, ProxyConfig};

/// Where a proxy assignment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySource {
    /// Dedicated binding for this credential
    Bound,
    /// Global proxy shared by all credentials
    Global,
}

/// The proxy one backend call should go through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAssignment {
    pub proxy: ProxyUrl,
    pub source: ProxySource,
}

/// Resolves outbound proxies from the store's proxy configuration
pub struct ProxyManager {
    db: Arc<dyn Database>,
}

impl ProxyManager {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Resolve the proxy for a credential, or `None` for a direct connection.
    ///
    /// Fails with `ProxyConfig` when the configured URL is invalid.
    #[instrument(skip(self))]
    pub async fn proxy_for(&self, credential_id: &str) -> AppResult<Option<ProxyAssignment>> {
        let config = self.db.get_proxy_config().await?;
        let assignment = Self::resolve(&config, credential_id)?;

        match &assignment {
            Some(a) => debug!(proxy = %a.proxy, source = ?a.source, "Routing backend call through proxy"),
            None => debug!("Routing backend call directly"),
        }
        Ok(assignment)
    }

    /// Pure resolution against a configuration snapshot
    pub fn resolve(config: &ProxyConfig, credential_id: &str) -> AppResult<Option<ProxyAssignment>> {
        if !config.enabled {
            return Ok(None);
        }

        if let Some(bound) = config.credential_bindings.get(credential_id) {
            if let Some(proxy) = ProxyUrl::parse_optional(Some(bound))? {
                return Ok(Some(ProxyAssignment {
                    proxy,
                    source: ProxySource::Bound,
                }));
            }
        }

        Ok(ProxyUrl::parse_optional(config.proxy_url.as_deref())?.map(|proxy| {
            ProxyAssignment {
                proxy,
                source: ProxySource::Global,
            }
        }))
    }

    /// Validate the stored configuration, including bindings no request
    /// has resolved yet
    pub async fn check(&self) -> AppResult<()> {
        Self::validate(&self.db.get_proxy_config().await?)
    }

    /// Validate every URL in a configuration
    pub fn validate(config: &ProxyConfig) -> AppResult<()> {
        ProxyUrl::parse_optional(config.proxy_url.as_deref())?;
        for url in config.credential_bindings.values() {
            ProxyUrl::parse_optional(Some(url))?;
        }
        Ok(())
    }
}
