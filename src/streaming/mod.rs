//! Streaming chat completion output
//!
//! Translates generation events into OpenAI-compatible SSE chunks.

pub mod content;
pub mod sse;
pub mod translator;

pub use content::{extract_media_url, media_markdown, CONTENT_CONVENTION_VERSION};
pub use sse::StreamMetadata;
pub use translator::{Emission, StreamTranslator, TranslatorState};
