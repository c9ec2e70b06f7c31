//! Common test utilities for Flowgate
//!
//! Shared fixtures: a scriptable fake browser for the captcha broker,
//! pre-provisioned credentials, and an assembled application wired to a
//! mock Flow backend.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;

use flowgate::captcha::{Browser, BrowserContext, BrowserLauncher, ContextOptions, LaunchOptions};
use flowgate::routes::create_router;
use flowgate::store::{Credential, Database, InMemoryStore};
use flowgate::{AppError, AppResult, AppState, Config};

/// Test configuration constants
pub mod constants {
    /// API key inbound test clients present
    pub const TEST_API_KEY: &str = "test-api-key";
    /// Project every ready credential is bound to
    pub const TEST_PROJECT_ID: &str = "project-1";
    pub const IMAGE_MODEL: &str = "gemini-2.5-flash-image-landscape";
    pub const VIDEO_MODEL: &str = "veo_3_1_t2v_fast_landscape";
    pub const MEDIA_URL: &str = "https://media.example/generated.png";
}

/// Config pointed at the mock backend with fast retries
pub fn test_config(backend_uri: &str) -> Config {
    let mut config = Config::for_backend(backend_uri, constants::TEST_API_KEY);
    config.captcha.script_wait_ms = 10;
    config.captcha.solve_timeout_seconds = 5;
    config.captcha.dedicated_driver = false;
    config.pool.refresh_interval_seconds = 0;
    config
}

/// A credential with a valid access token, credits and a project
pub fn ready_credential(id: &str) -> Credential {
    let mut credential = Credential::new(id, format!("st-{}", id));
    credential.email = Some(format!("{}@example.com", id));
    credential.access_token = Some(format!("at-{}", id));
    credential.access_token_expiry = Some(Utc::now() + chrono::Duration::hours(6));
    credential.credits = 100;
    credential.project_id = Some(constants::TEST_PROJECT_ID.to_string());
    credential
}

/// A credential whose access token has already expired
pub fn expired_credential(id: &str) -> Credential {
    let mut credential = ready_credential(id);
    credential.access_token_expiry = Some(Utc::now() - chrono::Duration::minutes(5));
    credential
}

// =============================================================================
// Fake browser
// =============================================================================

/// Counters and scripted answers shared by every fake browser object
#[derive(Default)]
pub struct FakeBrowserState {
    tokens: Mutex<VecDeque<String>>,
    pub launches: AtomicUsize,
    pub contexts_opened: AtomicUsize,
    pub contexts_closed: AtomicUsize,
    pub browsers_closed: AtomicUsize,
    pub solves: AtomicUsize,
    /// Hold the challenge evaluation this long before answering
    solve_delay: Mutex<Duration>,
    launch_delay: Mutex<Duration>,
    last_proxy: Mutex<Option<String>>,
    /// Liveness flag of the most recently launched browser
    current: Mutex<Option<Arc<AtomicBool>>>,
}

/// Scriptable launcher handing out [`FakeBrowser`]s
#[derive(Clone, Default)]
pub struct FakeLauncher {
    pub state: Arc<FakeBrowserState>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue challenge tokens; once drained, tokens are numbered `token-N`
    pub fn with_tokens(tokens: &[&str]) -> Self {
        let launcher = Self::new();
        launcher
            .state
            .tokens
            .lock()
            .unwrap()
            .extend(tokens.iter().map(|t| t.to_string()));
        launcher
    }

    pub fn set_solve_delay(&self, delay: Duration) {
        *self.state.solve_delay.lock().unwrap() = delay;
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.state.launch_delay.lock().unwrap() = delay;
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn contexts_opened(&self) -> usize {
        self.state.contexts_opened.load(Ordering::SeqCst)
    }

    pub fn contexts_closed(&self) -> usize {
        self.state.contexts_closed.load(Ordering::SeqCst)
    }

    pub fn browsers_closed(&self) -> usize {
        self.state.browsers_closed.load(Ordering::SeqCst)
    }

    pub fn last_proxy(&self) -> Option<String> {
        self.state.last_proxy.lock().unwrap().clone()
    }

    /// Kill the running browser as if its process crashed
    pub fn crash_browser(&self) {
        if let Some(alive) = self.state.current.lock().unwrap().as_ref() {
            alive.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: LaunchOptions) -> AppResult<Arc<dyn Browser>> {
        let delay = *self.state.launch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        *self.state.current.lock().unwrap() = Some(alive.clone());
        Ok(Arc::new(FakeBrowser {
            state: self.state.clone(),
            alive,
        }))
    }
}

pub struct FakeBrowser {
    state: Arc<FakeBrowserState>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_context(&self, options: ContextOptions) -> AppResult<Box<dyn BrowserContext>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(AppError::ChallengeUnavailable("browser connection lost".into()));
        }
        self.state.contexts_opened.fetch_add(1, Ordering::SeqCst);
        *self.state.last_proxy.lock().unwrap() = options.proxy.map(|p| p.to_url_string());
        Ok(Box::new(FakeContext {
            state: self.state.clone(),
        }))
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> AppResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.state.browsers_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeContext {
    state: Arc<FakeBrowserState>,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn goto(&mut self, _url: &str) -> AppResult<()> {
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> AppResult<serde_json::Value> {
        if script.contains("typeof window.grecaptcha.execute") {
            return Ok(serde_json::Value::Bool(true));
        }
        if script.contains("grecaptcha.ready") {
            let delay = *self.state.solve_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let n = self.state.solves.fetch_add(1, Ordering::SeqCst) + 1;
            let token = self
                .state
                .tokens
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| format!("token-{}", n));
            return Ok(serde_json::Value::String(token));
        }
        Err(AppError::CaptchaFailure(format!("unexpected script: {}", script)))
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        self.state.contexts_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Assembled application
// =============================================================================

/// Application wired to the mock backend, a fake browser and an in-memory store
pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryStore>,
    pub launcher: FakeLauncher,
}

impl TestApp {
    pub fn new(config: Config, credentials: Vec<Credential>, launcher: FakeLauncher) -> Self {
        let store = Arc::new(InMemoryStore::with_credentials(credentials));
        let state = Arc::new(AppState::new_for_testing(
            config,
            store.clone() as Arc<dyn Database>,
            Arc::new(launcher.clone()),
        ));
        Self {
            state,
            store,
            launcher,
        }
    }

    /// HTTP test server over the full router
    pub fn server(&self) -> TestServer {
        TestServer::new(create_router(self.state.clone())).unwrap()
    }

    pub async fn credential(&self, id: &str) -> Credential {
        self.store.get_credential(id).await.unwrap().unwrap()
    }
}
