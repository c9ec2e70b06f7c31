//! Credential pool
//!
//! [`TokenManager`] selects and maintains credentials; [`TokenRefresher`]
//! keeps their access tokens fresh in the background.

pub mod manager;
pub mod refresher;

pub use manager::{Outcome, PoolSummary, SeedEntry, TokenManager};
pub use refresher::{RefreshReport, TokenRefresher};
