//! Models endpoint
//!
//! Lists the servable model catalogue.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::flow::MODELS;

/// Model information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    /// `image` or `video`
    pub modality: String,
    pub aspect_ratio: String,
}

/// Models list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<Model>,
}

/// Catalogue creation timestamp reported to clients
const CATALOGUE_CREATED: i64 = 1_735_689_600;

pub async fn list_models() -> (StatusCode, Json<ModelsResponse>) {
    let data = MODELS
        .iter()
        .map(|spec| Model {
            id: spec.id.to_string(),
            object: "model".to_string(),
            created: CATALOGUE_CREATED,
            owned_by: "flowgate".to_string(),
            modality: spec.capability.to_string(),
            aspect_ratio: serde_json::to_value(spec.aspect_ratio)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default(),
        })
        .collect();

    (
        StatusCode::OK,
        Json(ModelsResponse {
            object: "list".to_string(),
            data,
        }),
    )
}
