//! Flow backend wire format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Tier;

pub const TOOL_NAME: &str = "PINHOLE";
pub const UPLOAD_TOOL_NAME: &str = "ASSET_MANAGER";

// Session exchange

#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub access_token: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

#[derive(Debug, Deserialize)]
pub struct SessionUser {
    pub email: Option<String>,
    pub name: Option<String>,
}

// Credits

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsResponse {
    #[serde(default)]
    pub credits: u64,
    #[serde(default)]
    pub user_paygate_tier: Tier,
}

// Project provisioning (tRPC envelope)

#[derive(Debug, Serialize)]
pub struct TrpcRequest<T> {
    pub json: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectInput<'a> {
    pub project_title: &'a str,
    pub tool_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TrpcResponse<T> {
    pub result: TrpcResult<T>,
}

#[derive(Debug, Deserialize)]
pub struct TrpcResult<T> {
    pub data: TrpcData<T>,
}

#[derive(Debug, Deserialize)]
pub struct TrpcData<T> {
    pub json: TrpcJson<T>,
}

#[derive(Debug, Deserialize)]
pub struct TrpcJson<T> {
    pub result: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedProject {
    pub project_id: Option<String>,
}

// Shared request context

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recaptcha_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub session_id: String,
    pub tool: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_paygate_tier: Option<Tier>,
}

impl ClientContext {
    pub fn new(tool: &'static str) -> Self {
        Self {
            recaptcha_token: None,
            project_id: None,
            session_id: format!(";{}", Utc::now().timestamp_millis()),
            tool,
            user_paygate_tier: None,
        }
    }
}

// Reference image upload

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageRequest<'a> {
    pub image_input: UploadImageInput<'a>,
    pub client_context: ClientContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageInput<'a> {
    pub raw_image_bytes: &'a str,
    pub mime_type: &'a str,
    pub is_user_uploaded: bool,
    pub aspect_ratio: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageResponse {
    pub media_generation_id: Option<MediaGenerationId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaGenerationId {
    pub media_generation_id: Option<String>,
}

// Image generation

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGenerateImagesRequest<'a> {
    pub client_context: ClientContext,
    pub requests: Vec<ImageGenerationRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationRequest<'a> {
    pub client_context: ClientContext,
    pub seed: u32,
    pub image_model_name: &'a str,
    pub image_aspect_ratio: &'a str,
    pub prompt: &'a str,
    pub image_inputs: Vec<ImageInputRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInputRef {
    pub name: String,
    pub image_input_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGenerateImagesResponse {
    #[serde(default)]
    pub media: Vec<GeneratedMedia>,
    pub remaining_credits: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedMedia {
    pub name: Option<String>,
    pub image: Option<GeneratedImageWrapper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImageWrapper {
    pub generated_image: Option<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub fife_url: Option<String>,
    pub name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

// Video generation

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartVideoRequest<'a> {
    pub client_context: ClientContext,
    pub requests: Vec<VideoGenerationRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGenerationRequest<'a> {
    pub aspect_ratio: &'a str,
    pub seed: u32,
    pub text_input: TextInput<'a>,
    pub video_model_key: &'a str,
    pub metadata: SceneMetadata,
}

#[derive(Debug, Serialize)]
pub struct TextInput<'a> {
    pub prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneMetadata {
    pub scene_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartVideoResponse {
    #[serde(default)]
    pub operations: Vec<VideoOperation>,
    pub remaining_credits: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CheckVideoRequest<'a> {
    pub operations: &'a [VideoOperation],
}

#[derive(Debug, Deserialize)]
pub struct CheckVideoResponse {
    #[serde(default)]
    pub operations: Vec<VideoOperation>,
}

/// Handle of an asynchronous video job, echoed back on every poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOperation {
    pub operation: OperationHandle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub name: String,
    #[serde(default, skip_serializing)]
    pub metadata: Option<OperationMetadata>,
    #[serde(default, skip_serializing)]
    pub error: Option<OperationError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperationMetadata {
    pub video: Option<GeneratedVideo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedVideo {
    pub fife_url: Option<String>,
    pub media_generation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperationError {
    pub message: Option<String>,
}

pub const STATUS_SUCCESSFUL: &str = "MEDIA_GENERATION_STATUS_SUCCESSFUL";
pub const STATUS_FAILED: &str = "MEDIA_GENERATION_STATUS_FAILED";
