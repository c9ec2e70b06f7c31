//! Headless browser abstraction
//!
//! The broker drives the browser only through these traits, so the
//! automation engine can be swapped (and faked in tests).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::proxy::ProxyUrl;

/// Browser process launch settings
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: Option<String>,
    pub args: Vec<String>,
    pub window_size: (u32, u32),
    pub user_agent: String,
}

impl LaunchOptions {
    pub fn headless(executable: Option<String>, user_agent: &str) -> Self {
        Self {
            executable,
            args: [
                "--disable-blink-features=AutomationControlled",
                "--disable-dev-shm-usage",
                "--no-sandbox",
                "--disable-setuid-sandbox",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            window_size: (1920, 1080),
            user_agent: user_agent.to_string(),
        }
    }
}

/// Settings for one isolated browsing context
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub proxy: Option<ProxyUrl>,
}

/// Starts browser processes
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> AppResult<Arc<dyn Browser>>;
}

/// A running browser process
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a fresh context sharing no cookies or storage with any other
    async fn new_context(&self, options: ContextOptions) -> AppResult<Box<dyn BrowserContext>>;

    /// Whether the process is still reachable
    async fn is_alive(&self) -> bool;

    /// Terminate the process
    async fn close(&self) -> AppResult<()>;
}

/// One isolated context with a single page
#[async_trait]
pub trait BrowserContext: Send {
    async fn goto(&mut self, url: &str) -> AppResult<()>;

    /// Evaluate a script, awaiting a returned promise
    async fn evaluate(&mut self, script: &str) -> AppResult<serde_json::Value>;

    async fn close(self: Box<Self>) -> AppResult<()>;
}
