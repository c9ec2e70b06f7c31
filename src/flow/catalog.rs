//! Public model catalogue
//!
//! Each public model id encodes the modality and the framing; the backend
//! only sees the model key and the aspect ratio.

use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::store::Capability;

/// Output framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    Landscape,
    Portrait,
}

impl AspectRatio {
    pub fn image_wire(self) -> &'static str {
        match self {
            AspectRatio::Landscape => "IMAGE_ASPECT_RATIO_LANDSCAPE",
            AspectRatio::Portrait => "IMAGE_ASPECT_RATIO_PORTRAIT",
        }
    }

    pub fn video_wire(self) -> &'static str {
        match self {
            AspectRatio::Landscape => "VIDEO_ASPECT_RATIO_LANDSCAPE",
            AspectRatio::Portrait => "VIDEO_ASPECT_RATIO_PORTRAIT",
        }
    }
}

/// One servable model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub id: &'static str,
    pub capability: Capability,
    /// Model key sent to the backend
    pub backend_model: &'static str,
    pub aspect_ratio: AspectRatio,
}

impl ModelSpec {
    const fn image(id: &'static str, backend_model: &'static str, aspect_ratio: AspectRatio) -> Self {
        Self {
            id,
            capability: Capability::Image,
            backend_model,
            aspect_ratio,
        }
    }

    const fn video(id: &'static str, backend_model: &'static str, aspect_ratio: AspectRatio) -> Self {
        Self {
            id,
            capability: Capability::Video,
            backend_model,
            aspect_ratio,
        }
    }
}

pub const MODELS: &[ModelSpec] = &[
    ModelSpec::image("gemini-2.5-flash-image-landscape", "GEM_PIX", AspectRatio::Landscape),
    ModelSpec::image("gemini-2.5-flash-image-portrait", "GEM_PIX", AspectRatio::Portrait),
    ModelSpec::image("imagen-4.0-generate-preview-landscape", "IMAGEN_3_5", AspectRatio::Landscape),
    ModelSpec::image("imagen-4.0-generate-preview-portrait", "IMAGEN_3_5", AspectRatio::Portrait),
    ModelSpec::video("veo_3_1_t2v_fast_landscape", "veo_3_1_t2v_fast", AspectRatio::Landscape),
    ModelSpec::video("veo_3_1_t2v_fast_portrait", "veo_3_1_t2v_fast_portrait", AspectRatio::Portrait),
];

/// Resolve a public model id
pub fn lookup(id: &str) -> AppResult<&'static ModelSpec> {
    MODELS
        .iter()
        .find(|m| m.id == id)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown model: {}", id)))
}
