//! Background access token refresher
//!
//! Periodically refreshes access tokens that are missing or about to expire,
//! through the same serialized path as on-demand refreshes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manager::TokenManager;
use crate::error::ErrorKind;

/// Counts from one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: usize,
    pub disabled: usize,
}

pub struct TokenRefresher {
    manager: Arc<TokenManager>,
    interval: Duration,
    cancel: CancellationToken,
}

impl TokenRefresher {
    pub fn new(manager: Arc<TokenManager>, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the background loop when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the refresh loop; a zero interval disables it
    pub fn start(self) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() {
            info!("Background token refresh disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Background token refresh started");
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("Background token refresh stopped");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        self.run_once().await;
                    }
                }
            }
        }))
    }

    /// Refresh every credential that is due
    pub async fn run_once(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        let due = match self.manager.due_for_refresh().await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to list credentials for refresh");
                return report;
            }
        };

        if due.is_empty() {
            debug!("No access tokens due for refresh");
            return report;
        }

        for credential in due {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.manager.refresh_access_token(&credential.id).await {
                Ok(_) => report.refreshed += 1,
                Err(e) if e.kind() == ErrorKind::Auth => {
                    // the manager has already disabled the credential
                    report.failed += 1;
                    report.disabled += 1;
                    warn!(credential = %credential.label(), "Session token revoked");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        credential = %credential.label(),
                        error = %e,
                        "Scheduled refresh failed, retrying next cycle"
                    );
                }
            }
        }

        info!(
            refreshed = report.refreshed,
            failed = report.failed,
            disabled = report.disabled,
            "Refresh pass complete"
        );
        report
    }
}
