//! Mock infrastructure for external services
//!
//! Provides a wiremock-based stand-in for the Flow backend (both the labs
//! web origin and the API origin, served from one mock server).

pub mod flow;

pub use flow::*;
