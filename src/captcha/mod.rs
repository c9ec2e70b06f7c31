//! Challenge solving
//!
//! The backend gates generation behind a bot-detection challenge that can
//! only be solved in a real browser. [`CaptchaBroker`] owns one shared
//! headless browser and hands out single-use challenge tokens.

pub mod broker;
pub mod browser;
pub mod chromium;
pub mod driver;

use async_trait::async_trait;

use crate::error::AppResult;

pub use broker::{validate_browser_proxy, CaptchaBroker};
pub use browser::{Browser, BrowserContext, BrowserLauncher, ContextOptions, LaunchOptions};
pub use chromium::ChromiumLauncher;
pub use driver::DriverHost;

/// Source of single-use challenge tokens
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Check local settings before a solve is attempted.
    ///
    /// Reports misconfiguration (such as an unusable browser proxy) with a
    /// specific error instead of letting `solve` fail opaquely.
    async fn preflight(&self) -> AppResult<()> {
        Ok(())
    }

    /// A fresh token for `project_id`, or `None` when solving failed
    async fn solve(&self, project_id: &str) -> Option<String>;
}
