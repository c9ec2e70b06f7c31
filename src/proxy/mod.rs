//! Outbound proxy handling
//!
//! Parses proxy URLs and resolves which proxy a backend call should use.

pub mod manager;
pub mod url;

pub use manager::{ProxyAssignment, ProxyManager, ProxySource};
pub use url::{ProxyCredentials, ProxyScheme, ProxyUrl};
