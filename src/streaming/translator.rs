//! Generation events to chat completion chunks
//!
//! A small state machine: `Progress` until a terminal event arrives, then
//! `Final` (media) or `Error`, then `Done`. Output order is fixed: progress
//! deltas, one content or error delta, the `[DONE]` marker.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::content::media_markdown;
use super::sse::{
    create_chunk, format_error_event, format_sse_chunk, format_sse_done, Delta, StreamMetadata,
};
use crate::error::AppError;
use crate::generation::{EventItem, EventStream, GenerationEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorState {
    Progress,
    Final,
    Error,
    Done,
}

/// One unit of translator output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Reasoning(String),
    Content(String),
    Error { code: &'static str, message: String },
    Done,
}

pub struct StreamTranslator {
    metadata: StreamMetadata,
    state: TranslatorState,
    deadline: Duration,
    announced_role: bool,
}

impl StreamTranslator {
    pub fn new(model: &str, deadline: Duration) -> Self {
        Self {
            metadata: StreamMetadata::new(model),
            state: TranslatorState::Progress,
            deadline,
            announced_role: false,
        }
    }

    pub fn state(&self) -> TranslatorState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == TranslatorState::Done
    }

    fn fail(&mut self, error: &AppError) -> Vec<Emission> {
        self.state = TranslatorState::Error;
        let emitted = vec![
            Emission::Error {
                code: error.code(),
                message: error.public_message(),
            },
            Emission::Done,
        ];
        self.state = TranslatorState::Done;
        emitted
    }

    /// Consume one upstream event
    pub fn on_event(&mut self, item: EventItem) -> Vec<Emission> {
        if self.state != TranslatorState::Progress {
            return Vec::new();
        }

        match item {
            Err(malformed) => {
                debug!(detail = %malformed.0, "Skipping malformed progress event");
                Vec::new()
            }
            Ok(GenerationEvent::Progress(text)) => vec![Emission::Reasoning(format!("{}\n", text))],
            Ok(GenerationEvent::Completed(result)) => match result.primary() {
                Some(item) => {
                    self.state = TranslatorState::Final;
                    let content = media_markdown(item);
                    self.state = TranslatorState::Done;
                    vec![Emission::Content(content), Emission::Done]
                }
                None => self.fail(&AppError::BackendMalformed(
                    "generation returned no media".to_string(),
                )),
            },
            Ok(GenerationEvent::Failed(error)) => {
                warn!(error = %error, "Generation failed");
                self.fail(&error)
            }
        }
    }

    /// The overall deadline passed
    pub fn on_timeout(&mut self) -> Vec<Emission> {
        if self.is_done() {
            return Vec::new();
        }
        warn!(deadline_secs = self.deadline.as_secs(), "Generation stalled past deadline");
        self.fail(&AppError::Timeout("generation stalled".to_string()))
    }

    /// Upstream ended without a terminal event
    pub fn finish(&mut self) -> Vec<Emission> {
        if self.is_done() {
            return Vec::new();
        }
        self.fail(&AppError::BackendMalformed(
            "generation ended without a result".to_string(),
        ))
    }

    /// SSE bytes for one emission
    pub fn render(&mut self, emission: &Emission) -> Bytes {
        let role = if self.announced_role {
            None
        } else {
            self.announced_role = true;
            Some("assistant")
        };

        match emission {
            Emission::Reasoning(text) => format_sse_chunk(&create_chunk(
                &self.metadata,
                Delta {
                    role,
                    reasoning_content: Some(text.clone()),
                    ..Default::default()
                },
                None,
            )),
            Emission::Content(content) => format_sse_chunk(&create_chunk(
                &self.metadata,
                Delta {
                    role,
                    content: Some(content.clone()),
                    ..Default::default()
                },
                Some("stop"),
            )),
            Emission::Error { code, message } => format_error_event(message, code),
            Emission::Done => format_sse_done(),
        }
    }

    /// Drive an event stream to completion under the overall deadline
    pub fn into_sse(self, events: EventStream) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        async_stream::stream! {
            let mut translator = self;
            let mut events = events;
            let deadline = tokio::time::Instant::now() + translator.deadline;

            while !translator.is_done() {
                let emissions = match tokio::time::timeout_at(deadline, events.next()).await {
                    Ok(Some(item)) => translator.on_event(item),
                    Ok(None) => translator.finish(),
                    Err(_) => translator.on_timeout(),
                };
                for emission in emissions {
                    yield Ok(translator.render(&emission));
                }
            }
        }
    }
}
