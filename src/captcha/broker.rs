//! Challenge broker
//!
//! One shared headless browser, launched lazily on first use. Each solve
//! runs in its own isolated context, bounded by a semaphore and a deadline,
//! and the context is closed on every exit path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::browser::{Browser, BrowserContext, BrowserLauncher, ContextOptions, LaunchOptions};
use super::driver::DriverHost;
use super::ChallengeSolver;
use crate::config::CaptchaSettings;
use crate::error::{AppError, AppResult};
use crate::flow::client::USER_AGENT;
use crate::proxy::ProxyUrl;
use crate::store::{token_prefix, CaptchaConfig, Database};

const CHALLENGE_SCRIPT_URL: &str = "https://www.google.com/recaptcha/api.js";

/// Check the browser proxy before anything is launched with it.
///
/// Authenticated SOCKS5 proxies are rejected because the browser engine
/// cannot answer their authentication handshake.
pub fn validate_browser_proxy(config: &CaptchaConfig) -> AppResult<Option<ProxyUrl>> {
    if !config.browser_proxy_enabled {
        return Ok(None);
    }

    let proxy = match ProxyUrl::parse_optional(config.browser_proxy_url.as_deref())? {
        Some(proxy) => proxy,
        None => return Ok(None),
    };

    if proxy.scheme.is_socks() && proxy.has_credentials() {
        return Err(AppError::ProxyConfig(format!(
            "browser does not support authenticated SOCKS5 proxies ({}); use an HTTP proxy or drop the credentials",
            proxy.server()
        )));
    }

    Ok(Some(proxy))
}

/// Shared headless-browser challenge solver
pub struct CaptchaBroker {
    settings: CaptchaSettings,
    labs_base_url: String,
    db: Arc<dyn Database>,
    launcher: Arc<dyn BrowserLauncher>,
    driver: DriverHost,
    browser: RwLock<Option<Arc<dyn Browser>>>,
    init: Mutex<()>,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
    launches: AtomicUsize,
}

impl CaptchaBroker {
    pub fn new(
        settings: CaptchaSettings,
        labs_base_url: &str,
        db: Arc<dyn Database>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_contexts.max(1)));
        Self {
            driver: DriverHost::new(settings.dedicated_driver),
            settings,
            labs_base_url: labs_base_url.trim_end_matches('/').to_string(),
            db,
            launcher,
            browser: RwLock::new(None),
            init: Mutex::new(()),
            slots,
            closed: AtomicBool::new(false),
            launches: AtomicUsize::new(0),
        }
    }

    /// How many times a browser process was started
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Contexts currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn is_running(&self) -> bool {
        self.browser.read().await.is_some()
    }

    /// The shared browser, launching it on first use.
    ///
    /// At most one process is live at a time; a browser that died is
    /// dropped and replaced by the next caller.
    async fn browser(&self) -> AppResult<Arc<dyn Browser>> {
        let current = self.browser.read().await.clone();
        if let Some(browser) = current {
            if browser.is_alive().await {
                return Ok(browser);
            }
        }

        let _init = self.init.lock().await;
        let current = self.browser.read().await.clone();
        if let Some(browser) = current {
            if browser.is_alive().await {
                return Ok(browser);
            }
            warn!("Headless browser is gone, relaunching");
            *self.browser.write().await = None;
            counter!("flowgate_browser_relaunches_total").increment(1);
            if let Ok(Err(e)) = self.driver.spawn(async move { browser.close().await }).await {
                debug!(error = %e, "Closing dead browser failed");
            }
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::ChallengeUnavailable("broker is closed".to_string()));
        }

        self.driver.activate()?;

        let launcher = self.launcher.clone();
        let options = LaunchOptions::headless(self.settings.browser_path.clone(), USER_AGENT);
        let browser = self
            .driver
            .spawn(async move { launcher.launch(options).await })
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("browser launch task failed: {}", e)))??;

        self.launches.fetch_add(1, Ordering::SeqCst);
        info!(dedicated_driver = self.driver.is_dedicated(), "Headless browser launched");

        *self.browser.write().await = Some(browser.clone());
        Ok(browser)
    }

    async fn acquire_slot(&self) -> AppResult<OwnedSemaphorePermit> {
        tokio::time::timeout(self.settings.solve_timeout(), self.slots.clone().acquire_owned())
            .await
            .map_err(|_| AppError::Timeout("waiting for a browser context slot".to_string()))?
            .map_err(|_| AppError::ChallengeUnavailable("broker is closed".to_string()))
    }

    #[instrument(skip(self))]
    async fn try_solve(&self, project_id: &str) -> AppResult<String> {
        let captcha_config = self.db.get_captcha_config().await?;
        let proxy = validate_browser_proxy(&captcha_config)?;

        let browser = self.browser().await?;
        let permit = self.acquire_slot().await?;

        let job = ChallengeJob {
            page_url: format!("{}/fx/tools/flow/project/{}", self.labs_base_url, project_id),
            site_key: self.settings.site_key.clone(),
            action: self.settings.action.clone(),
            script_wait: Duration::from_millis(self.settings.script_wait_ms),
            deadline: self.settings.solve_timeout(),
            context: ContextOptions { proxy },
        };

        // Dropping the caller cancels the job; the job still closes its context.
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let task = self.driver.spawn(job.run(browser, permit, cancel));

        task.await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("challenge task failed: {}", e)))?
    }

    /// Release the browser and restore the host driver.
    ///
    /// The driver is restored even when closing the browser fails.
    pub async fn close(&self) {
        let _init = self.init.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        self.slots.close();

        if let Some(browser) = self.browser.write().await.take() {
            let closed = self.driver.spawn(async move { browser.close().await }).await;
            match closed {
                Ok(Ok(())) => info!("Headless browser closed"),
                Ok(Err(e)) => warn!(error = %e, "Headless browser close failed"),
                Err(e) => warn!(error = %e, "Headless browser close task failed"),
            }
        }

        self.driver.restore().await;
    }
}

#[async_trait]
impl ChallengeSolver for CaptchaBroker {
    async fn preflight(&self) -> AppResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::ChallengeUnavailable("broker is closed".to_string()));
        }
        let captcha_config = self.db.get_captcha_config().await?;
        validate_browser_proxy(&captcha_config)?;
        Ok(())
    }

    /// Never fails: every fault becomes `None`
    async fn solve(&self, project_id: &str) -> Option<String> {
        let started = Instant::now();
        let outcome = self.try_solve(project_id).await;
        histogram!("flowgate_captcha_solve_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(token) => {
                counter!("flowgate_captcha_solves_total", "result" => "success").increment(1);
                debug!(token = %token_prefix(&token), "Challenge solved");
                Some(token)
            }
            Err(e) => {
                counter!("flowgate_captcha_solves_total", "result" => e.kind().as_str()).increment(1);
                warn!(error = %e, project_id = %project_id, "Challenge solve failed");
                None
            }
        }
    }
}

/// One solve, executed on the driver runtime
struct ChallengeJob {
    page_url: String,
    site_key: String,
    action: String,
    script_wait: Duration,
    deadline: Duration,
    context: ContextOptions,
}

impl ChallengeJob {
    async fn run(
        self,
        browser: Arc<dyn Browser>,
        permit: OwnedSemaphorePermit,
        cancel: CancellationToken,
    ) -> AppResult<String> {
        let mut context = browser.new_context(self.context.clone()).await?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(AppError::ChallengeUnavailable("solve cancelled".to_string())),
            result = tokio::time::timeout(self.deadline, self.drive(context.as_mut())) => {
                result.unwrap_or_else(|_| Err(AppError::Timeout("challenge solve deadline".to_string())))
            }
        };

        if let Err(e) = context.close().await {
            warn!(error = %e, "Failed to close browser context");
        }
        drop(permit);
        outcome
    }

    async fn drive(&self, context: &mut dyn BrowserContext) -> AppResult<String> {
        context.goto(&self.page_url).await?;

        let loaded = context.evaluate(scripts::CHALLENGE_READY).await?;
        if loaded.as_bool() != Some(true) {
            debug!("Challenge script missing, injecting");
            context
                .evaluate(&scripts::inject(CHALLENGE_SCRIPT_URL, &self.site_key))
                .await?;
            tokio::time::sleep(self.script_wait).await;
        }

        let token = context
            .evaluate(&scripts::execute(&self.site_key, &self.action))
            .await?;

        token
            .as_str()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::ChallengeUnavailable("challenge returned no token".to_string()))
    }
}

mod scripts {
    pub const CHALLENGE_READY: &str =
        "!!(window.grecaptcha && typeof window.grecaptcha.execute === 'function')";

    pub fn inject(script_url: &str, site_key: &str) -> String {
        format!(
            r#"new Promise((resolve, reject) => {{
    const script = document.createElement('script');
    script.src = '{}?render={}';
    script.async = true;
    script.onload = () => resolve(true);
    script.onerror = () => reject(new Error('challenge script failed to load'));
    document.head.appendChild(script);
}})"#,
            script_url, site_key
        )
    }

    pub fn execute(site_key: &str, action: &str) -> String {
        format!(
            r#"new Promise((resolve, reject) => {{
    window.grecaptcha.ready(() => {{
        window.grecaptcha.execute('{}', {{ action: '{}' }}).then(resolve).catch(reject);
    }});
}})"#,
            site_key, action
        )
    }
}
