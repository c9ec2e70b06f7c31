//! Flow backend protocol
//!
//! Catalogue of servable models, wire types, failure classification and the
//! stateless HTTP client.

pub mod catalog;
pub mod classify;
pub mod client;
pub mod models;
pub mod wire;

pub use catalog::{lookup as lookup_model, AspectRatio, ModelSpec, MODELS};
pub use client::{FlowApiClient, VideoJob};
pub use models::{
    CreditInfo, GenerationRequest, GenerationResult, ImageInput, MediaItem, SessionInfo,
    VideoStatus,
};
pub use wire::VideoOperation;
