//! Generation orchestration
//!
//! Drives acquire, project provisioning and backend calls with the retry
//! policy, reporting progress as a lazy event stream. Dropping the stream
//! drops the in-flight work, which cancels backend calls and any pending
//! challenge solve.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, RetryConfig};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::flow::{FlowApiClient, GenerationRequest, GenerationResult, VideoStatus};
use crate::store::{Capability, Credential};
use crate::tokens::{Outcome, TokenManager};

/// One step of a generation as seen by the caller
#[derive(Debug)]
pub enum GenerationEvent {
    /// Human-readable status text
    Progress(String),
    Completed(GenerationResult),
    Failed(AppError),
}

/// A progress report that could not be interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEvent(pub String);

pub type EventItem = Result<GenerationEvent, MalformedEvent>;
pub type EventStream = Pin<Box<dyn Stream<Item = EventItem> + Send>>;

#[derive(Clone)]
struct ProgressSink(mpsc::UnboundedSender<EventItem>);

impl ProgressSink {
    fn say(&self, text: impl Into<String>) {
        let _ = self.0.send(Ok(GenerationEvent::Progress(text.into())));
    }

    fn malformed(&self, detail: impl Into<String>) {
        let _ = self.0.send(Err(MalformedEvent(detail.into())));
    }
}

enum Step {
    Event(EventItem),
    Done(AppResult<GenerationResult>),
}

pub struct GenerationService {
    tokens: Arc<TokenManager>,
    flow: Arc<FlowApiClient>,
    retry: RetryConfig,
    poll_interval: Duration,
    deadline: Duration,
}

impl GenerationService {
    pub fn new(tokens: Arc<TokenManager>, flow: Arc<FlowApiClient>, config: &Config) -> Self {
        Self {
            tokens,
            flow,
            retry: config.retry.clone(),
            poll_interval: Duration::from_millis(config.video_poll_interval_ms),
            deadline: config.generation_timeout(),
        }
    }

    /// Events for one generation: progress, then exactly one `Completed` or
    /// `Failed`. Nothing runs until the stream is polled.
    pub fn events(self: &Arc<Self>, request: GenerationRequest) -> EventStream {
        let service = Arc::clone(self);

        Box::pin(async_stream::stream! {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let sink = ProgressSink(tx);
            let deadline = service.deadline;
            let run = async move {
                tokio::time::timeout(deadline, service.run(&request, &sink))
                    .await
                    .unwrap_or_else(|_| Err(AppError::Timeout("generation deadline exceeded".to_string())))
            };
            tokio::pin!(run);

            let outcome = loop {
                let step = tokio::select! {
                    biased;
                    Some(item) = rx.recv() => Step::Event(item),
                    outcome = &mut run => Step::Done(outcome),
                };
                match step {
                    Step::Event(item) => yield item,
                    Step::Done(outcome) => break outcome,
                }
            };

            while let Ok(item) = rx.try_recv() {
                yield item;
            }

            match outcome {
                Ok(result) => yield Ok(GenerationEvent::Completed(result)),
                Err(e) => yield Ok(GenerationEvent::Failed(e)),
            }
        })
    }

    /// Run a generation to completion, ignoring progress
    pub async fn generate(self: &Arc<Self>, request: GenerationRequest) -> AppResult<GenerationResult> {
        use futures::StreamExt;

        let mut events = self.events(request);
        while let Some(item) = events.next().await {
            match item {
                Ok(GenerationEvent::Completed(result)) => return Ok(result),
                Ok(GenerationEvent::Failed(e)) => return Err(e),
                _ => {}
            }
        }
        Err(AppError::Internal(anyhow::anyhow!("generation ended without a result")))
    }

    #[instrument(skip(self, request, sink), fields(model = request.model.id))]
    async fn run(&self, request: &GenerationRequest, sink: &ProgressSink) -> AppResult<GenerationResult> {
        let capability = request.capability();
        let mut last_error = None;

        for round in 1..=self.retry.max_credential_attempts.max(1) {
            sink.say("Selecting an account");
            let credential = match self.tokens.acquire(capability).await {
                Ok(credential) => credential,
                Err(e) => {
                    if let Some(previous) = &last_error {
                        warn!(previous = %previous, "Pool exhausted after failed attempts");
                    }
                    return Err(e);
                }
            };

            match self.with_credential(credential, request, sink).await {
                Ok(result) => return Ok(result),
                Err(e) if matches!(e.kind(), ErrorKind::QuotaExhausted | ErrorKind::Auth) => {
                    info!(round, error = %e, "Credential unusable, selecting another");
                    sink.say("Account unavailable, switching accounts");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::NoCapacity("no credential attempts left".to_string())))
    }

    /// All attempts against one credential; records exactly one outcome.
    ///
    /// A session token rejected during the single auth refresh is not
    /// retried: the token manager has already disabled the credential.
    async fn with_credential(
        &self,
        credential: Credential,
        request: &GenerationRequest,
        sink: &ProgressSink,
    ) -> AppResult<GenerationResult> {
        let id = credential.id.clone();
        let result = self.attempts(credential, request, sink).await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failure(e.kind()),
        };
        if let Err(e) = self.tokens.record_outcome(&id, outcome).await {
            warn!(error = %e, "Failed to record credential outcome");
        }

        if let Ok(GenerationResult {
            remaining_credits: Some(remaining),
            ..
        }) = &result
        {
            if let Err(e) = self.tokens.update_credits(&id, *remaining).await {
                warn!(error = %e, "Failed to store remaining credits");
            }
        }
        result
    }

    async fn attempts(
        &self,
        credential: Credential,
        request: &GenerationRequest,
        sink: &ProgressSink,
    ) -> AppResult<GenerationResult> {
        let mut credential = self.tokens.ensure_project(&credential.id).await?;
        let mut refreshed = false;
        let mut captcha_failures = 0;
        let mut transient_failures = 0;

        loop {
            let result = self.call(&credential, request, sink).await;
            let label = match &result {
                Ok(_) => "success",
                Err(e) => e.kind().as_str(),
            };
            counter!("flowgate_generation_attempts_total", "outcome" => label).increment(1);

            let err = match result {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            match err.kind() {
                ErrorKind::Auth if !refreshed => {
                    refreshed = true;
                    sink.say("Refreshing access token");
                    credential = self.tokens.refresh_access_token(&credential.id).await?;
                }
                kind if kind.is_challenge() => {
                    captcha_failures += 1;
                    if captcha_failures >= self.retry.captcha_max_attempts {
                        return Err(err);
                    }
                    debug!(captcha_failures, kind = %kind, "Challenge failed, discarding token");
                    sink.say(format!(
                        "Challenge failed, retrying ({}/{})",
                        captcha_failures + 1,
                        self.retry.captcha_max_attempts
                    ));
                }
                kind if kind.is_retryable() => {
                    transient_failures += 1;
                    if transient_failures >= self.retry.transient_max_attempts {
                        return Err(err);
                    }
                    let backoff = Duration::from_millis(self.retry.backoff_ms * transient_failures as u64);
                    sink.say("Backend busy, retrying");
                    tokio::time::sleep(backoff).await;
                }
                _ => return Err(err),
            }
        }
    }

    async fn call(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
        sink: &ProgressSink,
    ) -> AppResult<GenerationResult> {
        match request.capability() {
            Capability::Image => {
                sink.say("Generating image");
                self.flow.generate(credential, request).await
            }
            Capability::Video => self.video(credential, request, sink).await,
        }
    }

    async fn video(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
        sink: &ProgressSink,
    ) -> AppResult<GenerationResult> {
        sink.say("Submitting video job");
        let job = self.flow.generate_video(credential, request).await?;
        sink.say("Video job accepted");

        loop {
            tokio::time::sleep(self.poll_interval).await;

            match self.flow.poll_video(credential, &job.operations).await {
                Ok(VideoStatus::Pending { status }) => {
                    let phase = status
                        .strip_prefix("MEDIA_GENERATION_STATUS_")
                        .unwrap_or(&status)
                        .to_ascii_lowercase();
                    sink.say(format!("Video generation {}", phase));
                }
                Ok(VideoStatus::Completed(mut result)) => {
                    result.remaining_credits = result.remaining_credits.or(job.remaining_credits);
                    return Ok(result);
                }
                Ok(VideoStatus::Failed(message)) => {
                    return Err(AppError::BackendMalformed(format!(
                        "video generation failed: {}",
                        message
                    )))
                }
                Err(e) if matches!(e.kind(), ErrorKind::BackendMalformed | ErrorKind::BackendTransient) => {
                    debug!(error = %e, "Unusable video status poll");
                    sink.malformed(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
    }
}
