//! Mock Flow backend for testing
//!
//! Provides wiremock-based mocks for the Flow endpoints:
//! - GET /fx/api/auth/session - Session token exchange
//! - GET /v1/credits - Credit balance
//! - POST /fx/api/trpc/project.createProject - Project provisioning
//! - POST /v1/projects/{id}/flowMedia:batchGenerateImages - Image generation
//! - POST /v1/video:batchAsyncGenerateVideoText - Video job start
//! - POST /v1/video:batchCheckAsyncVideoGenerationStatus - Video job status
//!
//! # Example
//!
//! ```rust,ignore
//! use crate::mocks::flow::MockFlowServer;
//!
//! #[tokio::test]
//! async fn test_with_flow_mock() {
//!     let flow = MockFlowServer::start().await;
//!     flow.mock_session_success("st-1", "at-1", "a@example.com").await;
//!
//!     // Use flow.uri() as both Flow base URLs
//! }
//! ```

use std::time::Duration;

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const SESSION_PATH: &str = "/fx/api/auth/session";
pub const CREDITS_PATH: &str = "/v1/credits";
pub const CREATE_PROJECT_PATH: &str = "/fx/api/trpc/project.createProject";
pub const START_VIDEO_PATH: &str = "/v1/video:batchAsyncGenerateVideoText";
pub const CHECK_VIDEO_PATH: &str = "/v1/video:batchCheckAsyncVideoGenerationStatus";

pub fn generate_images_path(project_id: &str) -> String {
    format!("/v1/projects/{}/flowMedia:batchGenerateImages", project_id)
}

fn session_cookie(session_token: &str) -> String {
    format!("__Secure-next-auth.session-token={}", session_token)
}

/// Mock Flow server wrapper
pub struct MockFlowServer {
    server: MockServer,
}

impl MockFlowServer {
    /// Start a new mock Flow server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Get the mock server URI
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Get all received requests (for assertion in tests)
    pub async fn received_requests(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Received requests whose path matches exactly
    pub async fn requests_to(&self, request_path: &str) -> Vec<wiremock::Request> {
        self.received_requests()
            .await
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }

    /// Check mounted expectations now instead of on drop
    pub async fn verify(&self) {
        self.server.verify().await;
    }

    // =========================================================================
    // Session exchange
    // =========================================================================

    fn session_body(access_token: &str, email: &str) -> serde_json::Value {
        json!({
            "user": {"name": "Test User", "email": email, "image": null},
            "expires": (chrono::Utc::now() + chrono::Duration::hours(6)).to_rfc3339(),
            "access_token": access_token
        })
    }

    /// Mock a successful exchange for one session token
    pub async fn mock_session_success(&self, session_token: &str, access_token: &str, email: &str) {
        Mock::given(method("GET"))
            .and(path(SESSION_PATH))
            .and(header("cookie", session_cookie(session_token).as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(Self::session_body(access_token, email)),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock a slow exchange that must be called exactly `times` times
    pub async fn mock_session_expect(
        &self,
        session_token: &str,
        access_token: &str,
        email: &str,
        times: u64,
        delay: Duration,
    ) {
        Mock::given(method("GET"))
            .and(path(SESSION_PATH))
            .and(header("cookie", session_cookie(session_token).as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(Self::session_body(access_token, email))
                    .set_delay(delay),
            )
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Mock a revoked session token: the exchange carries no access token
    pub async fn mock_session_revoked(&self, session_token: &str) {
        Mock::given(method("GET"))
            .and(path(SESSION_PATH))
            .and(header("cookie", session_cookie(session_token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // Credits and projects
    // =========================================================================

    pub async fn mock_credits(&self, credits: u64, tier: &str) {
        Mock::given(method("GET"))
            .and(path(CREDITS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "credits": credits,
                "userPaygateTier": tier
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_create_project(&self, project_id: &str) {
        Mock::given(method("POST"))
            .and(path(CREATE_PROJECT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"data": {"json": {"result": {"projectId": project_id}}}}
            })))
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // Image generation
    // =========================================================================

    fn image_body(media_url: &str, remaining_credits: u64) -> serde_json::Value {
        json!({
            "media": [{
                "name": "media-1",
                "image": {
                    "generatedImage": {
                        "fifeUrl": media_url,
                        "width": 1024,
                        "height": 576
                    }
                }
            }],
            "remainingCredits": remaining_credits
        })
    }

    /// Mock a successful image generation for any challenge token
    pub async fn mock_generate_image_success(&self, project_id: &str, media_url: &str) {
        Mock::given(method("POST"))
            .and(path(generate_images_path(project_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(Self::image_body(media_url, 90)))
            .mount(&self.server)
            .await;
    }

    /// Mock a successful image generation only for requests authenticated
    /// with `access_token`
    pub async fn mock_generate_image_for_token(
        &self,
        project_id: &str,
        access_token: &str,
        media_url: &str,
    ) {
        Mock::given(method("POST"))
            .and(path(generate_images_path(project_id)))
            .and(header("authorization", format!("Bearer {}", access_token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(Self::image_body(media_url, 90)))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Mock a successful image generation only for one challenge token
    pub async fn mock_generate_image_with_challenge(
        &self,
        project_id: &str,
        challenge_token: &str,
        media_url: &str,
    ) {
        Mock::given(method("POST"))
            .and(path(generate_images_path(project_id)))
            .and(body_partial_json(
                json!({"clientContext": {"recaptchaToken": challenge_token}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(Self::image_body(media_url, 90)))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Mock the backend rejecting the challenge token
    pub async fn mock_generate_image_captcha_rejected(&self, project_id: &str) {
        Mock::given(method("POST"))
            .and(path(generate_images_path(project_id)))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {
                    "code": 403,
                    "message": "reCAPTCHA evaluation failed",
                    "status": "PERMISSION_DENIED"
                }
            })))
            .with_priority(5)
            .mount(&self.server)
            .await;
    }

    /// Mock an arbitrary error status for image generation
    pub async fn mock_generate_image_error(&self, project_id: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path(generate_images_path(project_id)))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .with_priority(5)
            .mount(&self.server)
            .await;
    }

    /// Mock credit exhaustion for image generation
    pub async fn mock_generate_image_quota(&self, project_id: &str) {
        self.mock_generate_image_error(
            project_id,
            429,
            json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED"}}),
        )
        .await;
    }

    /// Mock an image generation that never answers in time
    pub async fn mock_generate_image_hanging(&self, project_id: &str, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(generate_images_path(project_id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(Self::image_body("https://late.example/x.png", 1))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // Video generation
    // =========================================================================

    pub async fn mock_start_video(&self, operation_name: &str) {
        Mock::given(method("POST"))
            .and(path(START_VIDEO_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "operations": [{
                    "operation": {"name": operation_name},
                    "sceneId": "scene-1",
                    "status": "MEDIA_GENERATION_STATUS_PENDING"
                }],
                "remainingCredits": 80
            })))
            .mount(&self.server)
            .await;
    }

    /// Status polls answer pending `pending_polls` times, then succeed
    pub async fn mock_video_status(&self, operation_name: &str, pending_polls: u64, video_url: &str) {
        if pending_polls > 0 {
            Mock::given(method("POST"))
                .and(path(CHECK_VIDEO_PATH))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "operations": [{
                        "operation": {"name": operation_name},
                        "sceneId": "scene-1",
                        "status": "MEDIA_GENERATION_STATUS_ACTIVE"
                    }]
                })))
                .up_to_n_times(pending_polls)
                .with_priority(1)
                .mount(&self.server)
                .await;
        }

        Mock::given(method("POST"))
            .and(path(CHECK_VIDEO_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "operations": [{
                    "operation": {
                        "name": operation_name,
                        "metadata": {
                            "video": {
                                "fifeUrl": video_url,
                                "mediaGenerationId": "video-1"
                            }
                        }
                    },
                    "sceneId": "scene-1",
                    "status": "MEDIA_GENERATION_STATUS_SUCCESSFUL"
                }]
            })))
            .with_priority(2)
            .mount(&self.server)
            .await;
    }
}
