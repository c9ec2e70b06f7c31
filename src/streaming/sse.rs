//! Chat completion chunks and their SSE framing

use bytes::Bytes;
use serde::Serialize;

/// Identity shared by every chunk of one completion
#[derive(Debug, Clone)]
pub struct StreamMetadata {
    pub id: String,
    pub model: String,
    pub created: i64,
}

impl StreamMetadata {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<StreamChoice>,
}

pub fn create_chunk(
    metadata: &StreamMetadata,
    delta: Delta,
    finish_reason: Option<&'static str>,
) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: metadata.id.clone(),
        object: "chat.completion.chunk",
        created: metadata.created,
        model: metadata.model.clone(),
        choices: vec![StreamChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    }
}

/// `data: {json}\n\n`
pub fn format_sse_chunk(chunk: &ChatCompletionChunk) -> Bytes {
    let json = serde_json::to_string(chunk).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {}\n\n", json))
}

/// `data: [DONE]\n\n`
pub fn format_sse_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[derive(Debug, Serialize)]
struct SseErrorEvent<'a> {
    error: SseErrorDetails<'a>,
}

#[derive(Debug, Serialize)]
struct SseErrorDetails<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    error_type: &'static str,
    code: &'a str,
}

/// Terminal error event
pub fn format_error_event(message: &str, code: &str) -> Bytes {
    let event = SseErrorEvent {
        error: SseErrorDetails {
            message,
            error_type: "stream_error",
            code,
        },
    };
    let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {}\n\n", json))
}
