//! Configuration management for Flowgate
//!
//! Static configuration is loaded from environment variables. Settings that
//! operators tune at runtime (proxies, browser proxy) live in the credential
//! store instead.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// API key inbound clients must present as a Bearer token
    pub api_key: String,

    /// Redis connection URL; the in-memory store is used when unset
    pub redis_url: Option<String>,
    /// Optional JSON file of session tokens imported at startup
    pub seed_file: Option<String>,

    /// Flow web origin (session exchange, project provisioning, captcha page)
    pub labs_base_url: String,
    /// Flow API origin (credits, generation)
    pub api_base_url: String,
    /// Per-request timeout for backend HTTP calls
    pub request_timeout_seconds: u64,

    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub captcha: CaptchaSettings,

    /// Overall deadline for one generation, including polling
    pub generation_timeout_seconds: u64,
    /// Poll interval for asynchronous video generation
    pub video_poll_interval_ms: u64,
}

/// Credential pool tunables
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Consecutive failures before a credential is disabled
    pub error_ban_threshold: u32,
    /// Access tokens expiring within this window are refreshed proactively
    pub refresh_ahead_seconds: i64,
    /// Background refresh period; zero disables the refresher
    pub refresh_interval_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            error_ban_threshold: 3,
            refresh_ahead_seconds: 3600,
            refresh_interval_seconds: 300,
        }
    }
}

/// Retry bounds for one generation request
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Challenge tokens tried per credential before giving up
    pub captcha_max_attempts: u32,
    /// Attempts on network/backend faults per credential
    pub transient_max_attempts: u32,
    /// Linear backoff step between transient retries
    pub backoff_ms: u64,
    /// Distinct credentials tried before surfacing a failure
    pub max_credential_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            captcha_max_attempts: 3,
            transient_max_attempts: 2,
            backoff_ms: 500,
            max_credential_attempts: 3,
        }
    }
}

/// Headless browser settings for the captcha broker
#[derive(Debug, Clone)]
pub struct CaptchaSettings {
    pub site_key: String,
    pub action: String,
    pub solve_timeout_seconds: u64,
    /// Grace period after injecting the challenge script
    pub script_wait_ms: u64,
    /// Maximum simultaneous isolated browser contexts
    pub max_contexts: usize,
    /// Host the browser on its own subprocess-capable runtime
    pub dedicated_driver: bool,
    /// Explicit Chromium executable; auto-detected when unset
    pub browser_path: Option<String>,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            site_key: "6LdsFiUsAAAAAIjVDZcuLhaHiDn5nnHVXVRQGeMV".to_string(),
            action: "FLOW_GENERATION".to_string(),
            solve_timeout_seconds: 30,
            script_wait_ms: 3000,
            max_contexts: 4,
            dedicated_driver: cfg!(windows),
            browser_path: None,
        }
    }
}

impl CaptchaSettings {
    pub fn solve_timeout(&self) -> Duration {
        Duration::from_secs(self.solve_timeout_seconds)
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        _ => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let captcha_defaults = CaptchaSettings::default();

        Ok(Self {
            host: env::var("FLOWGATE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("FLOWGATE_PORT", 8000)?,
            api_key: env::var("FLOWGATE_API_KEY").context("FLOWGATE_API_KEY must be set")?,

            redis_url: optional_var("REDIS_URL"),
            seed_file: optional_var("FLOWGATE_SEED_FILE"),

            labs_base_url: env::var("FLOW_LABS_BASE_URL")
                .unwrap_or_else(|_| "https://labs.google".to_string()),
            api_base_url: env::var("FLOW_API_BASE_URL")
                .unwrap_or_else(|_| "https://aisandbox-pa.googleapis.com".to_string()),
            request_timeout_seconds: parse_var("FLOW_REQUEST_TIMEOUT_SECONDS", 120)?,

            pool: PoolConfig {
                error_ban_threshold: parse_var("FLOW_ERROR_BAN_THRESHOLD", 3)?,
                refresh_ahead_seconds: parse_var("FLOW_AT_REFRESH_AHEAD_SECONDS", 3600)?,
                refresh_interval_seconds: parse_var("FLOW_REFRESH_INTERVAL_SECONDS", 300)?,
            },
            retry: RetryConfig {
                captcha_max_attempts: parse_var("FLOW_CAPTCHA_MAX_ATTEMPTS", 3)?,
                transient_max_attempts: parse_var("FLOW_TRANSIENT_MAX_ATTEMPTS", 2)?,
                backoff_ms: parse_var("FLOW_RETRY_BACKOFF_MS", 500)?,
                max_credential_attempts: parse_var("FLOW_MAX_CREDENTIAL_ATTEMPTS", 3)?,
            },
            captcha: CaptchaSettings {
                site_key: env::var("CAPTCHA_SITE_KEY").unwrap_or(captcha_defaults.site_key),
                action: env::var("CAPTCHA_ACTION").unwrap_or(captcha_defaults.action),
                solve_timeout_seconds: parse_var("CAPTCHA_SOLVE_TIMEOUT_SECONDS", 30)?,
                script_wait_ms: parse_var("CAPTCHA_SCRIPT_WAIT_MS", 3000)?,
                max_contexts: parse_var("CAPTCHA_MAX_CONTEXTS", 4)?,
                dedicated_driver: parse_bool(
                    "CAPTCHA_DEDICATED_DRIVER",
                    captcha_defaults.dedicated_driver,
                ),
                browser_path: optional_var("CAPTCHA_BROWSER_PATH"),
            },

            generation_timeout_seconds: parse_var("FLOW_GENERATION_TIMEOUT_SECONDS", 300)?,
            video_poll_interval_ms: parse_var("FLOW_VIDEO_POLL_INTERVAL_MS", 5000)?,
        })
    }

    /// Configuration pointing both Flow origins at one base URL, for tests
    /// and local mocks
    pub fn for_backend(base_url: &str, api_key: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            api_key: api_key.to_string(),
            redis_url: None,
            seed_file: None,
            labs_base_url: base_url.to_string(),
            api_base_url: base_url.to_string(),
            request_timeout_seconds: 10,
            pool: PoolConfig::default(),
            retry: RetryConfig {
                backoff_ms: 10,
                ..RetryConfig::default()
            },
            captcha: CaptchaSettings::default(),
            generation_timeout_seconds: 30,
            video_poll_interval_ms: 10,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_seconds)
    }
}
