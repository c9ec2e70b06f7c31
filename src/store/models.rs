//! Credential data model
//!
//! The pooled unit is a [`Credential`]: one backend account with its session
//! token, short-lived access token, credit balance and provisioned project.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generation modality a credential may serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Image,
    Video,
}

impl Capability {
    pub fn all() -> BTreeSet<Capability> {
        [Capability::Image, Capability::Video].into_iter().collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Image => "image",
            Capability::Video => "video",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account paygate tier as reported by the credits endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Tier {
    #[serde(rename = "PAYGATE_TIER_NOT_PAID")]
    NotPaid,
    #[serde(rename = "PAYGATE_TIER_ONE")]
    TierOne,
    #[serde(rename = "PAYGATE_TIER_TWO")]
    TierTwo,
    #[default]
    #[serde(other, rename = "UNKNOWN")]
    Unknown,
}

/// One pooled backend account
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub email: Option<String>,
    pub session_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub access_token_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub credits: u64,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub project_id: Option<String>,
    pub capabilities: BTreeSet<Capability>,
    pub active: bool,
    #[serde(default)]
    pub ban_reason: Option<String>,
}

impl Credential {
    /// A fresh, active credential with no access token yet
    pub fn new(id: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            session_token: session_token.into(),
            access_token: None,
            access_token_expiry: None,
            credits: 0,
            tier: Tier::Unknown,
            project_id: None,
            capabilities: Capability::all(),
            active: true,
            ban_reason: None,
        }
    }

    /// Whether the access token is present and valid at `now`
    pub fn has_valid_access_token(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.access_token_expiry) {
            (Some(at), Some(expiry)) => !at.is_empty() && expiry > now,
            _ => false,
        }
    }

    /// Whether the access token expires within `ahead_seconds` of `now`
    pub fn access_token_expires_within(&self, now: DateTime<Utc>, ahead_seconds: i64) -> bool {
        match self.access_token_expiry {
            Some(expiry) if self.access_token.as_deref().is_some_and(|t| !t.is_empty()) => {
                expiry <= now + chrono::Duration::seconds(ahead_seconds)
            }
            _ => true,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn label(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("session_token", &token_prefix(&self.session_token))
            .field(
                "access_token",
                &self.access_token.as_deref().map(token_prefix),
            )
            .field("access_token_expiry", &self.access_token_expiry)
            .field("credits", &self.credits)
            .field("tier", &self.tier)
            .field("project_id", &self.project_id)
            .field("capabilities", &self.capabilities)
            .field("active", &self.active)
            .field("ban_reason", &self.ban_reason)
            .finish()
    }
}

/// Shorten a secret for logs
pub fn token_prefix(token: &str) -> String {
    let prefix: String = token.chars().take(12).collect();
    if prefix.len() < token.len() {
        format!("{}...", prefix)
    } else {
        prefix
    }
}

/// Per-credential health bookkeeping, mutated only by the token manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStats {
    pub consecutive_error_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
}

/// Partial update of a stored credential; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub email: Option<String>,
    pub session_token: Option<String>,
    /// Access token and its expiry always travel together
    pub access_token: Option<(String, DateTime<Utc>)>,
    pub credits: Option<u64>,
    pub tier: Option<Tier>,
    pub project_id: Option<String>,
    pub capabilities: Option<BTreeSet<Capability>>,
    pub active: Option<bool>,
    /// `Some(None)` clears the ban reason
    pub ban_reason: Option<Option<String>>,
}

impl CredentialUpdate {
    pub fn ban(reason: impl Into<String>) -> Self {
        Self {
            active: Some(false),
            ban_reason: Some(Some(reason.into())),
            ..Self::default()
        }
    }

    /// The stored fields this update writes, as `(name, value)` pairs named
    /// the way a serialized [`Credential`] names them
    pub fn fields(&self) -> Vec<(&'static str, serde_json::Value)> {
        use serde_json::{json, Value};

        let mut fields = Vec::new();
        if let Some(email) = &self.email {
            fields.push(("email", Value::from(email.as_str())));
        }
        if let Some(st) = &self.session_token {
            fields.push(("sessionToken", Value::from(st.as_str())));
        }
        if let Some((at, expiry)) = &self.access_token {
            fields.push(("accessToken", Value::from(at.as_str())));
            fields.push(("accessTokenExpiry", json!(expiry)));
        }
        if let Some(credits) = self.credits {
            fields.push(("credits", Value::from(credits)));
        }
        if let Some(tier) = self.tier {
            fields.push(("tier", json!(tier)));
        }
        if let Some(project_id) = &self.project_id {
            fields.push(("projectId", Value::from(project_id.as_str())));
        }
        if let Some(capabilities) = &self.capabilities {
            fields.push(("capabilities", json!(capabilities)));
        }
        if let Some(active) = self.active {
            fields.push(("active", Value::from(active)));
        }
        if let Some(reason) = &self.ban_reason {
            fields.push(("banReason", json!(reason)));
        }
        fields
    }

    /// Apply the update in place, keeping the credential invariants
    pub fn apply(&self, credential: &mut Credential) {
        if let Some(email) = &self.email {
            credential.email = Some(email.clone());
        }
        if let Some(st) = &self.session_token {
            credential.session_token = st.clone();
        }
        if let Some((at, expiry)) = &self.access_token {
            credential.access_token = Some(at.clone());
            credential.access_token_expiry = Some(*expiry);
        }
        if let Some(credits) = self.credits {
            credential.credits = credits;
        }
        if let Some(tier) = self.tier {
            credential.tier = tier;
        }
        if let Some(project_id) = &self.project_id {
            credential.project_id = Some(project_id.clone());
        }
        if let Some(capabilities) = &self.capabilities {
            credential.capabilities = capabilities.clone();
        }
        if let Some(active) = self.active {
            credential.active = active;
        }
        if let Some(reason) = &self.ban_reason {
            credential.ban_reason = reason.clone();
        }
        // a banned credential is never active
        if credential.ban_reason.is_some() {
            credential.active = false;
        }
    }
}

/// Browser-side proxy settings used by the captcha broker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaConfig {
    pub browser_proxy_enabled: bool,
    pub browser_proxy_url: Option<String>,
}

/// Outbound proxy settings for backend HTTP calls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub enabled: bool,
    pub proxy_url: Option<String>,
    /// Credential id -> dedicated proxy URL
    #[serde(default)]
    pub credential_bindings: HashMap<String, String>,
}
