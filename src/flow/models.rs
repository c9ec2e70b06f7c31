//! Domain types exchanged with the Flow client

use chrono::{DateTime, Utc};

use super::catalog::ModelSpec;
use crate::store::{Capability, Tier};

/// Result of exchanging a session token
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub access_token: String,
    pub expires: DateTime<Utc>,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Credit balance and paygate tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditInfo {
    pub credits: u64,
    pub tier: Tier,
}

/// A reference image supplied with the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub mime_type: String,
    /// Base64 payload without the `data:` prefix
    pub data: String,
}

/// One generation as requested by a caller
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: &'static ModelSpec,
    pub image_inputs: Vec<ImageInput>,
}

impl GenerationRequest {
    pub fn capability(&self) -> Capability {
        self.model.capability
    }
}

/// One produced media item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub kind: Capability,
}

/// Media produced by one successful generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub media: Vec<MediaItem>,
    pub remaining_credits: Option<u64>,
}

impl GenerationResult {
    pub fn primary(&self) -> Option<&MediaItem> {
        self.media.first()
    }
}

/// Status of an asynchronous video job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoStatus {
    Pending { status: String },
    Completed(GenerationResult),
    Failed(String),
}
