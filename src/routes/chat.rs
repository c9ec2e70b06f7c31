//! Chat completions endpoint
//!
//! OpenAI-compatible chat surface over the generation service. The last user
//! message becomes the prompt; `image_url` parts carrying `data:` URLs become
//! reference images.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult},
    flow::{lookup_model, GenerationRequest, ImageInput},
    routes::metrics::record_request,
    store::Capability,
    streaming::{media_markdown, StreamTranslator},
    AppState,
};

/// Chat completion request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Message content: either a plain string or a list of typed parts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Non-streaming response
#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ResponseMessage {
    pub role: &'static str,
    pub content: String,
}

/// Generations are not token-metered; usage is reported as zero
#[derive(Debug, Serialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Split a `data:<mime>;base64,<payload>` URL
fn parse_data_url(url: &str) -> AppResult<ImageInput> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| AppError::BadRequest("Only data: image URLs are supported".to_string()))?;
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| AppError::BadRequest("Malformed data URL".to_string()))?;
    let mime_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| AppError::BadRequest("Data URL must be base64 encoded".to_string()))?;

    if !mime_type.starts_with("image/") || data.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Unsupported image payload: {}",
            mime_type
        )));
    }

    Ok(ImageInput {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

/// Turn a chat request into a generation request
pub fn build_generation_request(request: &ChatCompletionRequest) -> AppResult<GenerationRequest> {
    let model = lookup_model(&request.model)?;

    let message = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .ok_or_else(|| AppError::BadRequest("No user message in request".to_string()))?;

    let mut texts = Vec::new();
    let mut image_inputs = Vec::new();
    match &message.content {
        Some(MessageContent::Text(text)) => texts.push(text.as_str()),
        Some(MessageContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => texts.push(text.as_str()),
                    ContentPart::ImageUrl { image_url } => {
                        image_inputs.push(parse_data_url(&image_url.url)?)
                    }
                    ContentPart::Unsupported => {}
                }
            }
        }
        None => {}
    }

    let prompt = texts.join("\n").trim().to_string();
    if prompt.is_empty() {
        return Err(AppError::BadRequest("Prompt must not be empty".to_string()));
    }
    if !image_inputs.is_empty() && model.capability == Capability::Video {
        return Err(AppError::BadRequest(format!(
            "Model {} does not accept image inputs",
            model.id
        )));
    }

    Ok(GenerationRequest {
        prompt,
        model,
        image_inputs,
    })
}

/// Handle chat completion requests
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let start_time = Instant::now();

    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;
    let generation_request = build_generation_request(&request)?;

    info!(
        model = %request.model,
        stream = %request.stream,
        images = generation_request.image_inputs.len(),
        "Processing chat completion request"
    );

    if request.stream {
        handle_streaming(state, request.model, generation_request, start_time)
    } else {
        handle_non_streaming(state, request.model, generation_request, start_time).await
    }
}

async fn handle_non_streaming(
    state: Arc<AppState>,
    model: String,
    request: GenerationRequest,
    start_time: Instant,
) -> Result<Response, AppError> {
    let result = match state.generation.generate(request).await {
        Ok(result) => result,
        Err(e) => {
            warn!(model = %model, error = %e, "Generation failed");
            record_request(e.code(), &model, start_time.elapsed().as_secs_f64());
            return Err(e);
        }
    };

    let item = result
        .primary()
        .ok_or_else(|| AppError::BackendMalformed("generation returned no media".to_string()))?;

    let response = ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: media_markdown(item),
            },
            finish_reason: "stop",
        }],
        usage: Usage::default(),
    };

    record_request("success", &model, start_time.elapsed().as_secs_f64());
    Ok((StatusCode::OK, Json(response)).into_response())
}

fn handle_streaming(
    state: Arc<AppState>,
    model: String,
    request: GenerationRequest,
    start_time: Instant,
) -> Result<Response, AppError> {
    let events = state.generation.events(request);
    let translator = StreamTranslator::new(&model, state.config.generation_timeout());

    // final outcome travels inside the stream; only the start is recorded here
    record_request("streaming", &model, start_time.elapsed().as_secs_f64());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(translator.into_sse(events)))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))
}
