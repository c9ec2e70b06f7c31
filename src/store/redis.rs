//! Redis credential store
//!
//! Each credential is a Redis hash with one JSON-encoded value per field, so
//! partial updates touch only the fields they carry and apply atomically.
//! Stats and runtime settings are stored as JSON strings; the set of
//! credential ids is kept in a Redis set.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use super::{
    CaptchaConfig, Credential, CredentialStats, CredentialUpdate, Database, ProxyConfig,
};
use crate::error::{AppError, AppResult};

/// Apply field writes to an existing credential hash and return it whole.
/// A stored ban reason always forces `active` to false.
static UPDATE_CREDENTIAL: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return false
end
if #ARGV > 0 then
    redis.call('HSET', KEYS[1], unpack(ARGV))
end
local ban = redis.call('HGET', KEYS[1], 'banReason')
if ban and ban ~= 'null' then
    redis.call('HSET', KEYS[1], 'active', 'false')
end
return redis.call('HGETALL', KEYS[1])
"#,
    )
});

/// Encode a credential as hash fields
fn credential_fields(credential: &Credential) -> AppResult<Vec<(String, String)>> {
    match serde_json::to_value(credential)? {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(name, value)| Ok((name, serde_json::to_string(&value)?)))
            .collect(),
        other => Err(AppError::Internal(anyhow::anyhow!(
            "credential serialized to {}",
            other
        ))),
    }
}

/// Decode hash fields; an empty hash is a missing credential
fn credential_from_fields(fields: HashMap<String, String>) -> AppResult<Option<Credential>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let mut map = serde_json::Map::with_capacity(fields.len());
    for (name, raw) in fields {
        map.insert(name, serde_json::from_str(&raw)?);
    }
    Ok(Some(serde_json::from_value(serde_json::Value::Object(map))?))
}

/// Redis-backed store
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Create a new Redis store
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    /// Connect to Redis and wrap the connection
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        let _: () = conn.set(key, serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl Database for RedisStore {
    async fn get_all_credentials(&self) -> AppResult<Vec<Credential>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.smembers(keys::CREDENTIAL_IDS).await?;
        ids.sort();

        let mut credentials = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(credential) = self.get_credential(&id).await? {
                credentials.push(credential);
            }
        }
        Ok(credentials)
    }

    async fn get_credential(&self, id: &str) -> AppResult<Option<Credential>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(keys::credential(id)).await?;
        credential_from_fields(fields)
    }

    async fn insert_credential(&self, credential: &Credential) -> AppResult<()> {
        let key = keys::credential(&credential.id);
        let fields = credential_fields(credential)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .sadd(keys::CREDENTIAL_IDS, &credential.id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_credential(
        &self,
        id: &str,
        update: &CredentialUpdate,
    ) -> AppResult<Credential> {
        let mut invocation = UPDATE_CREDENTIAL.key(keys::credential(id));
        for (name, value) in update.fields() {
            invocation.arg(name).arg(serde_json::to_string(&value)?);
        }

        let mut conn = self.conn.clone();
        let fields: Option<HashMap<String, String>> = invocation.invoke_async(&mut conn).await?;
        fields
            .map(credential_from_fields)
            .transpose()?
            .flatten()
            .ok_or_else(|| AppError::NotFound(format!("credential {}", id)))
    }

    async fn delete_credential(&self, id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(vec![keys::credential(id), keys::stats(id)]).await?;
        let _: () = conn.srem(keys::CREDENTIAL_IDS, id).await?;
        Ok(())
    }

    async fn get_credential_stats(&self, id: &str) -> AppResult<CredentialStats> {
        Ok(self.get_json(&keys::stats(id)).await?.unwrap_or_default())
    }

    async fn update_credential_stats(&self, id: &str, stats: &CredentialStats) -> AppResult<()> {
        self.set_json(&keys::stats(id), stats).await
    }

    async fn get_captcha_config(&self) -> AppResult<CaptchaConfig> {
        Ok(self
            .get_json(keys::CAPTCHA_CONFIG)
            .await?
            .unwrap_or_default())
    }

    async fn set_captcha_config(&self, config: &CaptchaConfig) -> AppResult<()> {
        self.set_json(keys::CAPTCHA_CONFIG, config).await
    }

    async fn get_proxy_config(&self) -> AppResult<ProxyConfig> {
        Ok(self.get_json(keys::PROXY_CONFIG).await?.unwrap_or_default())
    }

    async fn set_proxy_config(&self, config: &ProxyConfig) -> AppResult<()> {
        self.set_json(keys::PROXY_CONFIG, config).await
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Store key layout
pub mod keys {
    /// Set of all credential ids; each id has a credential hash
    pub const CREDENTIAL_IDS: &str = "flowgate:credentials";
    pub const CAPTCHA_CONFIG: &str = "flowgate:config:captcha";
    pub const PROXY_CONFIG: &str = "flowgate:config:proxy";

    pub fn credential(id: &str) -> String {
        format!("flowgate:credential:{}", id)
    }

    pub fn stats(id: &str) -> String {
        format!("flowgate:stats:{}", id)
    }
}
