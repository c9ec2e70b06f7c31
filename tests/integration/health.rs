//! Health and models endpoint integration tests

use axum::http::{header, HeaderValue, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::Value;

use crate::common::constants::TEST_API_KEY;
use crate::common::{ready_credential, test_config, FakeLauncher, TestApp};
use crate::mocks::MockFlowServer;

#[tokio::test]
async fn test_health_reports_pool_summary() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![ready_credential("c1"), ready_credential("c2")],
        FakeLauncher::new(),
    );

    let response = app.server().get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["store"]["status"], "healthy");
    assert_eq!(body["pool"]["total"], 2);
    assert_eq!(body["pool"]["selectable_image"], 2);
    assert_eq!(body["browser"]["running"], false);
}

#[tokio::test]
async fn test_health_is_degraded_without_selectable_credentials() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(test_config(&flow.uri()), vec![], FakeLauncher::new());

    let response = app.server().get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_probes() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(test_config(&flow.uri()), vec![], FakeLauncher::new());
    let server = app.server();

    let ready = server.get("/health/ready").await;
    assert_eq!(ready.status_code(), StatusCode::OK);
    let live = server.get("/health/live").await;
    assert_eq!(live.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_models_lists_catalogue() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(test_config(&flow.uri()), vec![], FakeLauncher::new());

    let response = app
        .server()
        .get("/v1/models")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", TEST_API_KEY)).unwrap(),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"gemini-2.5-flash-image-landscape"));
    assert!(ids.contains(&"veo_3_1_t2v_fast_portrait"));
}
