//! Integration tests for Flowgate
//!
//! These tests drive the assembled application against a mock Flow backend
//! and a fake headless browser.

mod captcha;
mod health;
mod token_manager;
