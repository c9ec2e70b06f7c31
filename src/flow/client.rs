//! Flow API client
//!
//! Stateless transport for the Flow backend. Every call receives the token
//! and proxy material it needs; the only state is a cache of HTTP clients
//! keyed by proxy.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, COOKIE};
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};

use super::catalog::AspectRatio;
use super::classify::{classify_status, classify_transport};
use super::models::{
    CreditInfo, GenerationRequest, GenerationResult, ImageInput, MediaItem, SessionInfo,
    VideoStatus,
};
use super::wire::{self, ClientContext, VideoOperation};
use crate::captcha::ChallengeSolver;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::proxy::{ProxyManager, ProxyUrl};
use crate::store::{token_prefix, Capability, Credential, Tier};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SESSION_COOKIE: &str = "__Secure-next-auth.session-token";

/// A started asynchronous video job
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub operations: Vec<VideoOperation>,
    pub remaining_credits: Option<u64>,
}

/// Flow backend client
pub struct FlowApiClient {
    clients: DashMap<String, reqwest::Client>,
    labs_base_url: String,
    api_base_url: String,
    timeout: Duration,
    proxies: Arc<ProxyManager>,
    solver: Arc<dyn ChallengeSolver>,
}

impl FlowApiClient {
    pub fn new(
        config: &Config,
        proxies: Arc<ProxyManager>,
        solver: Arc<dyn ChallengeSolver>,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            labs_base_url: config.labs_base_url.trim_end_matches('/').to_string(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
            proxies,
            solver,
        }
    }

    /// HTTP client routed through `proxy`, built once per distinct proxy
    fn http(&self, proxy: Option<&ProxyUrl>) -> AppResult<reqwest::Client> {
        let key = proxy.map(ProxyUrl::to_url_string).unwrap_or_default();
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy.to_reqwest()?);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::ProxyConfig(format!("failed to build HTTP client: {}", e)))?;

        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Outbound proxy for calls made on behalf of a credential
    pub async fn route(&self, credential_id: &str) -> AppResult<Option<ProxyUrl>> {
        Ok(self
            .proxies
            .proxy_for(credential_id)
            .await?
            .map(|assignment| assignment.proxy))
    }

    /// Obtain one fresh challenge token for a project.
    ///
    /// Local solver trouble is `ChallengeUnavailable`; only the backend
    /// rejecting a token is a `CaptchaFailure`.
    pub async fn challenge(&self, project_id: &str) -> AppResult<String> {
        self.solver.preflight().await?;
        self.solver.solve(project_id).await.ok_or_else(|| {
            AppError::ChallengeUnavailable("challenge solver returned no token".to_string())
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, operation: &'static str) -> AppResult<String> {
        let response = request.send().await.map_err(|e| {
            error!(operation, error = %e, "Flow request failed to send");
            classify_transport(e)
        })?;

        let status = response.status();
        debug!(operation, status = %status, "Flow response status");

        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            let err = classify_status(status, &body);
            warn!(operation, status = %status, kind = %err.kind(), "Flow request rejected");
            return Err(err);
        }
        Ok(body)
    }

    fn parse<T: DeserializeOwned>(body: &str, operation: &'static str) -> AppResult<T> {
        serde_json::from_str(body).map_err(|e| {
            error!(operation, error = %e, "Failed to parse Flow response");
            AppError::BackendMalformed(format!("{}: {}", operation, e))
        })
    }

    /// Exchange a session token for an access token
    #[instrument(skip_all, fields(st = %token_prefix(session_token)))]
    pub async fn exchange_session(
        &self,
        session_token: &str,
        proxy: Option<&ProxyUrl>,
    ) -> AppResult<SessionInfo> {
        let url = format!("{}/fx/api/auth/session", self.labs_base_url);
        let request = self
            .http(proxy)?
            .get(&url)
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, session_token));

        let body = self.send(request, "exchange_session").await?;
        let session: wire::SessionResponse = Self::parse(&body, "exchange_session")?;

        let access_token = session
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Auth("session token rejected".to_string()))?;

        let expires = match session.expires {
            Some(expires) => expires,
            None => {
                warn!("Session response carried no expiry, assuming one hour");
                chrono::Utc::now() + chrono::Duration::hours(1)
            }
        };

        let (email, name) = session
            .user
            .map(|u| (u.email, u.name))
            .unwrap_or((None, None));

        debug!(at = %token_prefix(&access_token), expires = %expires, "Session exchanged");
        Ok(SessionInfo {
            access_token,
            expires,
            email,
            name,
        })
    }

    /// Read credit balance and tier
    #[instrument(skip_all, fields(at = %token_prefix(access_token)))]
    pub async fn check_credits(
        &self,
        access_token: &str,
        proxy: Option<&ProxyUrl>,
    ) -> AppResult<CreditInfo> {
        let url = format!("{}/v1/credits", self.api_base_url);
        let request = self
            .http(proxy)?
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token));

        let body = self.send(request, "check_credits").await?;
        let credits: wire::CreditsResponse = Self::parse(&body, "check_credits")?;

        Ok(CreditInfo {
            credits: credits.credits,
            tier: credits.user_paygate_tier,
        })
    }

    /// Provision a backend project
    #[instrument(skip(self, session_token, proxy), fields(st = %token_prefix(session_token)))]
    pub async fn create_project(
        &self,
        session_token: &str,
        name: &str,
        proxy: Option<&ProxyUrl>,
    ) -> AppResult<String> {
        let url = format!("{}/fx/api/trpc/project.createProject", self.labs_base_url);
        let payload = wire::TrpcRequest {
            json: wire::CreateProjectInput {
                project_title: name,
                tool_name: wire::TOOL_NAME,
            },
        };
        let request = self
            .http(proxy)?
            .post(&url)
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, session_token))
            .json(&payload);

        let body = self.send(request, "create_project").await?;
        let response: wire::TrpcResponse<wire::CreatedProject> =
            Self::parse(&body, "create_project")?;

        response
            .result
            .data
            .json
            .result
            .project_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::BackendMalformed("project response had no id".to_string()))
    }

    /// Upload a reference image, returning its media id
    #[instrument(skip_all, fields(mime = %input.mime_type))]
    pub async fn upload_image(
        &self,
        access_token: &str,
        input: &ImageInput,
        aspect_ratio: AspectRatio,
        proxy: Option<&ProxyUrl>,
    ) -> AppResult<String> {
        let url = format!("{}/v1:uploadUserImage", self.api_base_url);
        let payload = wire::UploadImageRequest {
            image_input: wire::UploadImageInput {
                raw_image_bytes: &input.data,
                mime_type: &input.mime_type,
                is_user_uploaded: true,
                aspect_ratio: aspect_ratio.image_wire(),
            },
            client_context: ClientContext::new(wire::UPLOAD_TOOL_NAME),
        };
        let request = self
            .http(proxy)?
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&payload);

        let body = self.send(request, "upload_image").await?;
        let response: wire::UploadImageResponse = Self::parse(&body, "upload_image")?;

        response
            .media_generation_id
            .and_then(|m| m.media_generation_id)
            .ok_or_else(|| AppError::BackendMalformed("upload response had no media id".to_string()))
    }

    /// One image generation call with an explicit challenge token
    #[instrument(
        skip(self, access_token, request, challenge_token, proxy),
        fields(model = request.model.id, challenge = %token_prefix(challenge_token))
    )]
    pub async fn generate_image(
        &self,
        access_token: &str,
        project_id: &str,
        request: &GenerationRequest,
        challenge_token: &str,
        proxy: Option<&ProxyUrl>,
    ) -> AppResult<GenerationResult> {
        let mut image_inputs = Vec::with_capacity(request.image_inputs.len());
        for input in &request.image_inputs {
            let media_id = self
                .upload_image(access_token, input, request.model.aspect_ratio, proxy)
                .await?;
            image_inputs.push(wire::ImageInputRef {
                name: media_id,
                image_input_type: "IMAGE_INPUT_TYPE_REFERENCE",
            });
        }

        let mut context = ClientContext::new(wire::TOOL_NAME);
        context.recaptcha_token = Some(challenge_token.to_string());
        context.project_id = Some(project_id.to_string());

        let payload = wire::BatchGenerateImagesRequest {
            client_context: context.clone(),
            requests: vec![wire::ImageGenerationRequest {
                client_context: context,
                seed: random_seed(),
                image_model_name: request.model.backend_model,
                image_aspect_ratio: request.model.aspect_ratio.image_wire(),
                prompt: &request.prompt,
                image_inputs,
            }],
        };

        let url = format!(
            "{}/v1/projects/{}/flowMedia:batchGenerateImages",
            self.api_base_url, project_id
        );
        let http_request = self
            .http(proxy)?
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&payload);

        let body = self.send(http_request, "generate_image").await?;
        let response: wire::BatchGenerateImagesResponse = Self::parse(&body, "generate_image")?;

        let media: Vec<MediaItem> = response
            .media
            .into_iter()
            .filter_map(|m| {
                let image = m.image?.generated_image?;
                let url = image.fife_url.filter(|u| !u.is_empty())?;
                Some(MediaItem {
                    id: m.name.or(image.name).unwrap_or_default(),
                    url,
                    width: image.width,
                    height: image.height,
                    kind: Capability::Image,
                })
            })
            .collect();

        if media.is_empty() {
            warn!("Image generation succeeded without usable media");
            return Err(AppError::BackendMalformed(
                "generation returned no media".to_string(),
            ));
        }

        debug!(count = media.len(), remaining = ?response.remaining_credits, "Images generated");
        Ok(GenerationResult {
            media,
            remaining_credits: response.remaining_credits,
        })
    }

    /// Start an asynchronous video job with an explicit challenge token
    #[instrument(
        skip(self, access_token, request, challenge_token, proxy),
        fields(model = request.model.id, challenge = %token_prefix(challenge_token))
    )]
    pub async fn start_video(
        &self,
        access_token: &str,
        project_id: &str,
        tier: Tier,
        request: &GenerationRequest,
        challenge_token: &str,
        proxy: Option<&ProxyUrl>,
    ) -> AppResult<VideoJob> {
        let mut context = ClientContext::new(wire::TOOL_NAME);
        context.recaptcha_token = Some(challenge_token.to_string());
        context.project_id = Some(project_id.to_string());
        context.user_paygate_tier = Some(tier);

        let payload = wire::StartVideoRequest {
            client_context: context,
            requests: vec![wire::VideoGenerationRequest {
                aspect_ratio: request.model.aspect_ratio.video_wire(),
                seed: random_seed(),
                text_input: wire::TextInput {
                    prompt: &request.prompt,
                },
                video_model_key: request.model.backend_model,
                metadata: wire::SceneMetadata {
                    scene_id: uuid::Uuid::new_v4().to_string(),
                },
            }],
        };

        let url = format!("{}/v1/video:batchAsyncGenerateVideoText", self.api_base_url);
        let http_request = self
            .http(proxy)?
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&payload);

        let body = self.send(http_request, "start_video").await?;
        let response: wire::StartVideoResponse = Self::parse(&body, "start_video")?;

        if response.operations.is_empty() {
            return Err(AppError::BackendMalformed(
                "video start returned no operations".to_string(),
            ));
        }

        Ok(VideoJob {
            operations: response.operations,
            remaining_credits: response.remaining_credits,
        })
    }

    /// Poll the status of a video job
    #[instrument(skip(self, access_token, operations, proxy), fields(ops = operations.len()))]
    pub async fn check_video_status(
        &self,
        access_token: &str,
        operations: &[VideoOperation],
        proxy: Option<&ProxyUrl>,
    ) -> AppResult<VideoStatus> {
        let url = format!(
            "{}/v1/video:batchCheckAsyncVideoGenerationStatus",
            self.api_base_url
        );
        let request = self
            .http(proxy)?
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&wire::CheckVideoRequest { operations });

        let body = self.send(request, "check_video_status").await?;
        let response: wire::CheckVideoResponse = Self::parse(&body, "check_video_status")?;

        video_status(response.operations)
    }

    /// Generate images for a credential, fetching a fresh challenge token and
    /// the credential's proxy
    pub async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> AppResult<GenerationResult> {
        let (access_token, project_id) = call_material(credential)?;
        let proxy = self.route(&credential.id).await?;
        let challenge = self.challenge(project_id).await?;

        self.generate_image(access_token, project_id, request, &challenge, proxy.as_ref())
            .await
    }

    /// Start a video job for a credential, fetching a fresh challenge token
    /// and the credential's proxy
    pub async fn generate_video(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> AppResult<VideoJob> {
        let (access_token, project_id) = call_material(credential)?;
        let proxy = self.route(&credential.id).await?;
        let challenge = self.challenge(project_id).await?;

        self.start_video(
            access_token,
            project_id,
            credential.tier,
            request,
            &challenge,
            proxy.as_ref(),
        )
        .await
    }

    /// Poll a video job on behalf of a credential
    pub async fn poll_video(
        &self,
        credential: &Credential,
        operations: &[VideoOperation],
    ) -> AppResult<VideoStatus> {
        let (access_token, _) = call_material(credential)?;
        let proxy = self.route(&credential.id).await?;
        self.check_video_status(access_token, operations, proxy.as_ref())
            .await
    }
}

fn call_material(credential: &Credential) -> AppResult<(&str, &str)> {
    let access_token = credential
        .access_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Auth(format!("credential {} has no access token", credential.id)))?;
    let project_id = credential.project_id.as_deref().ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "credential {} has no project",
            credential.id
        ))
    })?;
    Ok((access_token, project_id))
}

fn random_seed() -> u32 {
    rand::rng().random_range(1..100_000)
}

fn video_status(operations: Vec<VideoOperation>) -> AppResult<VideoStatus> {
    let first = operations
        .into_iter()
        .next()
        .ok_or_else(|| AppError::BackendMalformed("status poll returned no operations".to_string()))?;

    let status = first.status.clone().unwrap_or_default();
    match status.as_str() {
        wire::STATUS_SUCCESSFUL => {
            let video = first
                .operation
                .metadata
                .and_then(|m| m.video)
                .ok_or_else(|| AppError::BackendMalformed("finished video has no metadata".to_string()))?;
            let url = video
                .fife_url
                .filter(|u| !u.is_empty())
                .ok_or_else(|| AppError::BackendMalformed("finished video has no URL".to_string()))?;

            Ok(VideoStatus::Completed(GenerationResult {
                media: vec![MediaItem {
                    id: video
                        .media_generation_id
                        .unwrap_or(first.operation.name),
                    url,
                    width: None,
                    height: None,
                    kind: Capability::Video,
                }],
                remaining_credits: None,
            }))
        }
        wire::STATUS_FAILED => Ok(VideoStatus::Failed(
            first
                .operation
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "video generation failed".to_string()),
        )),
        _ => Ok(VideoStatus::Pending { status }),
    }
}
