//! Generation requests
//!
//! Orchestrates one generation from credential selection to final media.

pub mod service;

pub use service::{EventItem, EventStream, GenerationEvent, GenerationService, MalformedEvent};
