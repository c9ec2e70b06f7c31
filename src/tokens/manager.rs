//! Credential pool manager
//!
//! Owns every mutation of credentials and their stats: selection, access
//! token refresh, project provisioning, outcome bookkeeping and
//! disablement.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::PoolConfig;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::flow::FlowApiClient;
use crate::store::{
    token_prefix, Capability, Credential, CredentialStats, CredentialUpdate, Database,
};

/// Result of one use of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
}

/// Pool counts reported by health checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub active: usize,
    pub selectable_image: usize,
    pub selectable_video: usize,
}

/// One entry of a credential seed file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedEntry {
    pub session_token: String,
    #[serde(default)]
    pub capabilities: Option<BTreeSet<Capability>>,
}

/// Per-credential serialization point.
///
/// `lock` is held by every write to the credential record. `applied` counts
/// access tokens written; it only grows, and only under `lock`, so a
/// refresh that observed an older value while queued knows a fresher token
/// is already stored.
#[derive(Default)]
struct CredentialSlot {
    lock: Mutex<()>,
    stats: Mutex<()>,
    applied: AtomicU64,
}

/// Credential pool
pub struct TokenManager {
    db: Arc<dyn Database>,
    flow: Arc<FlowApiClient>,
    config: PoolConfig,
    pool_lock: Mutex<()>,
    slots: DashMap<String, Arc<CredentialSlot>>,
}

/// Failure kinds attributable to the credential itself.
///
/// Local faults (browser, proxy configuration, internal) never count.
fn penalizes(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Auth
            | ErrorKind::QuotaExhausted
            | ErrorKind::CaptchaFailure
            | ErrorKind::BackendTransient
            | ErrorKind::BackendMalformed
            | ErrorKind::Timeout
    )
}

impl TokenManager {
    pub fn new(db: Arc<dyn Database>, flow: Arc<FlowApiClient>, config: PoolConfig) -> Self {
        Self {
            db,
            flow,
            config,
            pool_lock: Mutex::new(()),
            slots: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn slot(&self, id: &str) -> Arc<CredentialSlot> {
        self.slots.entry(id.to_string()).or_default().clone()
    }

    async fn load(&self, id: &str) -> AppResult<Credential> {
        self.db
            .get_credential(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("credential {}", id)))
    }

    fn eligible(
        &self,
        credential: &Credential,
        stats: &CredentialStats,
        capability: Capability,
        now: DateTime<Utc>,
    ) -> bool {
        credential.active
            && credential.has_valid_access_token(now)
            && credential.credits > 0
            && credential.supports(capability)
            && stats.consecutive_error_count < self.config.error_ban_threshold
    }

    /// Pool snapshot with stats, in tie-break order
    async fn ranked(&self) -> AppResult<Vec<(Credential, CredentialStats)>> {
        let credentials = self.db.get_all_credentials().await?;
        let mut ranked = Vec::with_capacity(credentials.len());
        for credential in credentials {
            let stats = self.db.get_credential_stats(&credential.id).await?;
            ranked.push((credential, stats));
        }

        // Fewest consecutive errors first, then least recently used.
        ranked.sort_by(|(a, sa), (b, sb)| {
            sa.consecutive_error_count
                .cmp(&sb.consecutive_error_count)
                .then(sa.last_used_at.cmp(&sb.last_used_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(ranked)
    }

    async fn touch(&self, id: &str) -> AppResult<()> {
        let slot = self.slot(id);
        let _stats = slot.stats.lock().await;
        let mut stats = self.db.get_credential_stats(id).await?;
        stats.last_used_at = Some(Utc::now());
        self.db.update_credential_stats(id, &stats).await
    }

    /// Pick an eligible credential without refreshing anything.
    ///
    /// Fails fast with `NoCapacity`; never waits for a credential to free up.
    #[instrument(skip(self))]
    pub async fn select_credential(&self, capability: Capability) -> AppResult<Credential> {
        let _pool = self.pool_lock.lock().await;
        let now = Utc::now();

        let chosen = self
            .ranked()
            .await?
            .into_iter()
            .find(|(credential, stats)| self.eligible(credential, stats, capability, now))
            .map(|(credential, _)| credential);

        match chosen {
            Some(credential) => {
                self.touch(&credential.id).await?;
                debug!(credential = %credential.label(), "Credential selected");
                Ok(credential)
            }
            None => Err(AppError::NoCapacity(format!(
                "no eligible credential for {}",
                capability
            ))),
        }
    }

    /// Select a credential, refreshing expired access tokens when nothing is
    /// immediately eligible
    #[instrument(skip(self))]
    pub async fn acquire(&self, capability: Capability) -> AppResult<Credential> {
        match self.select_credential(capability).await {
            Err(AppError::NoCapacity(_)) => {}
            other => return other,
        }

        let now = Utc::now();
        let candidates: Vec<Credential> = self
            .ranked()
            .await?
            .into_iter()
            .filter(|(c, stats)| {
                c.active
                    && c.supports(capability)
                    && !c.has_valid_access_token(now)
                    && stats.consecutive_error_count < self.config.error_ban_threshold
            })
            .map(|(c, _)| c)
            .collect();

        for candidate in candidates {
            match self.refresh_access_token(&candidate.id).await {
                Ok(refreshed) => {
                    let stats = self.db.get_credential_stats(&refreshed.id).await?;
                    if self.eligible(&refreshed, &stats, capability, Utc::now()) {
                        self.touch(&refreshed.id).await?;
                        info!(credential = %refreshed.label(), "Credential acquired after refresh");
                        return Ok(refreshed);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Auth => {
                    debug!(credential = %candidate.label(), "Revoked credential skipped");
                }
                Err(e) => {
                    warn!(credential = %candidate.label(), error = %e, "Refresh during acquire failed");
                }
            }
        }

        Err(AppError::NoCapacity(format!(
            "no eligible credential for {}",
            capability
        )))
    }

    /// Exchange the session token for a fresh access token.
    ///
    /// Concurrent calls for one credential serialize; a caller that waited
    /// behind a completed refresh (or a token import) reuses the stored
    /// token instead of exchanging again. A rejected session token disables
    /// the credential before the `Auth` error is returned.
    #[instrument(skip(self))]
    pub async fn refresh_access_token(&self, credential_id: &str) -> AppResult<Credential> {
        let slot = self.slot(credential_id);
        let observed = slot.applied.load(Ordering::SeqCst);

        let _guard = slot.lock.lock().await;
        if slot.applied.load(Ordering::SeqCst) > observed {
            debug!("Refresh already applied while waiting");
            return self.load(credential_id).await;
        }

        let credential = self.load(credential_id).await?;
        let proxy = self.flow.route(credential_id).await?;

        let session = match self
            .flow
            .exchange_session(&credential.session_token, proxy.as_ref())
            .await
        {
            Ok(session) => session,
            Err(e) if e.kind() == ErrorKind::Auth => {
                self.write_ban(credential_id, ErrorKind::Auth.as_str()).await?;
                return Err(e);
            }
            Err(e) => {
                return Err(match e.kind() {
                    ErrorKind::Timeout | ErrorKind::ProxyConfig => e,
                    _ => AppError::BackendTransient(e.to_string()),
                })
            }
        };

        let mut update = CredentialUpdate {
            email: session.email.clone(),
            access_token: Some((session.access_token.clone(), session.expires)),
            ..Default::default()
        };
        match self
            .flow
            .check_credits(&session.access_token, proxy.as_ref())
            .await
        {
            Ok(credits) => {
                update.credits = Some(credits.credits);
                update.tier = Some(credits.tier);
            }
            Err(e) => warn!(error = %e, "Credit probe after refresh failed"),
        }

        let updated = self.db.update_credential(credential_id, &update).await?;
        slot.applied.fetch_add(1, Ordering::SeqCst);

        info!(
            credential = %updated.label(),
            at = %token_prefix(&session.access_token),
            expires = %session.expires,
            "Access token refreshed"
        );
        Ok(updated)
    }

    /// Provision a project for the credential if it has none
    #[instrument(skip(self))]
    pub async fn ensure_project(&self, credential_id: &str) -> AppResult<Credential> {
        let slot = self.slot(credential_id);
        let _guard = slot.lock.lock().await;

        let credential = self.load(credential_id).await?;
        if credential.project_id.is_some() {
            return Ok(credential);
        }

        let proxy = self.flow.route(credential_id).await?;
        let name = format!("Flowgate {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        let project_id = self
            .flow
            .create_project(&credential.session_token, &name, proxy.as_ref())
            .await?;

        info!(credential = %credential.label(), project_id = %project_id, "Project provisioned");
        self.db
            .update_credential(
                credential_id,
                &CredentialUpdate {
                    project_id: Some(project_id),
                    ..Default::default()
                },
            )
            .await
    }

    /// Record the outcome of one use
    #[instrument(skip(self))]
    pub async fn record_outcome(&self, credential_id: &str, outcome: Outcome) -> AppResult<()> {
        let kind = match outcome {
            Outcome::Failure(kind) if !penalizes(kind) => {
                debug!(kind = %kind, "Failure not attributed to credential");
                return Ok(());
            }
            Outcome::Failure(kind) => Some(kind),
            Outcome::Success => None,
        };

        let slot = self.slot(credential_id);
        let stats = {
            let _stats = slot.stats.lock().await;
            let mut stats = self.db.get_credential_stats(credential_id).await?;
            match kind {
                None => {
                    stats.consecutive_error_count = 0;
                    stats.success_count += 1;
                }
                Some(_) => {
                    stats.consecutive_error_count += 1;
                    stats.error_count += 1;
                    stats.last_error_at = Some(Utc::now());
                }
            }
            self.db.update_credential_stats(credential_id, &stats).await?;
            stats
        };

        if let Some(kind) = kind {
            if !self.load(credential_id).await?.active {
                debug!(kind = %kind, "Failure recorded on inactive credential");
            } else if kind.is_permanent() {
                self.disable_credential(credential_id, kind.as_str()).await?;
            } else if stats.consecutive_error_count >= self.config.error_ban_threshold {
                let reason = format!(
                    "{}: {} consecutive errors",
                    kind.as_str(),
                    stats.consecutive_error_count
                );
                self.disable_credential(credential_id, &reason).await?;
            } else {
                debug!(
                    kind = %kind,
                    consecutive = stats.consecutive_error_count,
                    "Credential failure recorded"
                );
            }
        }
        Ok(())
    }

    /// Import a session token as a new credential.
    ///
    /// An account already in the pool (same email) has its tokens replaced
    /// instead of being inserted twice.
    #[instrument(skip(self, session_token), fields(st = %token_prefix(session_token)))]
    pub async fn add_credential(
        &self,
        session_token: &str,
        capabilities: Option<BTreeSet<Capability>>,
    ) -> AppResult<Credential> {
        let id = uuid::Uuid::new_v4().to_string();
        let proxy = self.flow.route(&id).await?;
        let session = self
            .flow
            .exchange_session(session_token, proxy.as_ref())
            .await?;

        let credits = match self
            .flow
            .check_credits(&session.access_token, proxy.as_ref())
            .await
        {
            Ok(credits) => Some(credits),
            Err(e) => {
                warn!(error = %e, "Credit probe during import failed");
                None
            }
        };

        let existing = match &session.email {
            Some(email) => self
                .db
                .get_all_credentials()
                .await?
                .into_iter()
                .find(|c| c.email.as_deref() == Some(email.as_str())),
            None => None,
        };

        let update = CredentialUpdate {
            email: session.email.clone(),
            session_token: Some(session_token.to_string()),
            access_token: Some((session.access_token.clone(), session.expires)),
            credits: credits.map(|c| c.credits),
            tier: credits.map(|c| c.tier),
            capabilities,
            ..Default::default()
        };

        if let Some(existing) = existing {
            info!(credential = %existing.label(), "Updating tokens of known account");
            let slot = self.slot(&existing.id);
            let _guard = slot.lock.lock().await;
            let updated = self.db.update_credential(&existing.id, &update).await?;
            slot.applied.fetch_add(1, Ordering::SeqCst);
            return Ok(updated);
        }

        let mut credential = Credential::new(id, session_token);
        update.apply(&mut credential);
        self.db.insert_credential(&credential).await?;

        info!(credential = %credential.label(), credits = credential.credits, "Credential added");
        Ok(credential)
    }

    /// Import every entry of a seed file, logging failures
    pub async fn import_seed_file(&self, path: &str) -> AppResult<usize> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to read seed file {}: {}", path, e)))?;
        let entries: Vec<SeedEntry> = serde_json::from_str(&raw)?;

        let mut imported = 0;
        for entry in entries {
            match self
                .add_credential(&entry.session_token, entry.capabilities)
                .await
            {
                Ok(_) => imported += 1,
                Err(e) => warn!(
                    st = %token_prefix(&entry.session_token),
                    error = %e,
                    "Seed credential import failed"
                ),
            }
        }
        Ok(imported)
    }

    /// Zero the consecutive error count
    pub async fn reset_stats(&self, credential_id: &str) -> AppResult<()> {
        self.load(credential_id).await?;
        let slot = self.slot(credential_id);
        let _stats = slot.stats.lock().await;
        let mut stats = self.db.get_credential_stats(credential_id).await?;
        stats.consecutive_error_count = 0;
        self.db.update_credential_stats(credential_id, &stats).await
    }

    /// Clear any ban, reactivate and reset stats
    pub async fn enable_credential(&self, credential_id: &str) -> AppResult<Credential> {
        let credential = {
            let slot = self.slot(credential_id);
            let _guard = slot.lock.lock().await;
            self.db
                .update_credential(
                    credential_id,
                    &CredentialUpdate {
                        active: Some(true),
                        ban_reason: Some(None),
                        ..Default::default()
                    },
                )
                .await?
        };
        self.reset_stats(credential_id).await?;
        info!(credential = %credential.label(), "Credential enabled");
        Ok(credential)
    }

    pub async fn disable_credential(&self, credential_id: &str, reason: &str) -> AppResult<Credential> {
        let slot = self.slot(credential_id);
        let _guard = slot.lock.lock().await;
        self.write_ban(credential_id, reason).await
    }

    /// Ban the credential; the caller holds its slot lock
    async fn write_ban(&self, credential_id: &str, reason: &str) -> AppResult<Credential> {
        let credential = self
            .db
            .update_credential(credential_id, &CredentialUpdate::ban(reason))
            .await?;

        let label = reason.split(':').next().unwrap_or(reason).to_string();
        counter!("flowgate_credential_disabled_total", "reason" => label).increment(1);
        warn!(credential = %credential.label(), reason = %reason, "Credential disabled");
        Ok(credential)
    }

    /// Store the remaining credit balance reported after a generation
    pub async fn update_credits(&self, credential_id: &str, remaining: u64) -> AppResult<()> {
        let slot = self.slot(credential_id);
        let _guard = slot.lock.lock().await;
        self.db
            .update_credential(
                credential_id,
                &CredentialUpdate {
                    credits: Some(remaining),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Active credentials whose access token is missing or expires soon
    pub async fn due_for_refresh(&self) -> AppResult<Vec<Credential>> {
        let now = Utc::now();
        Ok(self
            .db
            .get_all_credentials()
            .await?
            .into_iter()
            .filter(|c| c.active && c.access_token_expires_within(now, self.config.refresh_ahead_seconds))
            .collect())
    }

    pub async fn pool_summary(&self) -> AppResult<PoolSummary> {
        let now = Utc::now();
        let mut summary = PoolSummary::default();
        for (credential, stats) in self.ranked().await? {
            summary.total += 1;
            if credential.active {
                summary.active += 1;
            }
            if self.eligible(&credential, &stats, Capability::Image, now) {
                summary.selectable_image += 1;
            }
            if self.eligible(&credential, &stats, Capability::Video, now) {
                summary.selectable_video += 1;
            }
        }
        Ok(summary)
    }
}
