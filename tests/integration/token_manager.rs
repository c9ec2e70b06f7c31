//! Credential pool integration tests
//!
//! Selection, refresh coalescing, outcome bookkeeping and seed import
//! against a mock Flow backend.

use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;

use flowgate::error::ErrorKind;
use flowgate::store::{Capability, Database};
use flowgate::tokens::{Outcome, TokenRefresher};
use flowgate::AppError;

use crate::common::{expired_credential, ready_credential, test_config, FakeLauncher, TestApp};
use crate::mocks::{MockFlowServer, SESSION_PATH};

#[tokio::test]
async fn test_empty_pool_fails_fast_with_no_capacity() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(test_config(&flow.uri()), vec![], FakeLauncher::new());

    let err = app.state.tokens.acquire(Capability::Image).await.unwrap_err();
    assert!(matches!(err, AppError::NoCapacity(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_exchanges_once() {
    let flow = MockFlowServer::start().await;
    flow.mock_session_expect(
        "st-c1",
        "at-fresh",
        "c1@example.com",
        1,
        Duration::from_millis(200),
    )
    .await;
    flow.mock_credits(250, "PAYGATE_TIER_ONE").await;

    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![expired_credential("c1")],
        FakeLauncher::new(),
    );

    let refreshes = (0..5).map(|_| {
        let tokens = app.state.tokens.clone();
        tokio::spawn(async move { tokens.refresh_access_token("c1").await })
    });
    for result in join_all(refreshes).await {
        let credential = result.unwrap().unwrap();
        assert_eq!(credential.access_token.as_deref(), Some("at-fresh"));
    }

    flow.verify().await;
    let stored = app.credential("c1").await;
    assert_eq!(stored.credits, 250);
    assert_eq!(flow.requests_to(SESSION_PATH).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ban_during_slow_refresh_survives() {
    let flow = MockFlowServer::start().await;
    flow.mock_session_expect(
        "st-c1",
        "at-fresh",
        "c1@example.com",
        1,
        Duration::from_millis(300),
    )
    .await;
    flow.mock_credits(250, "PAYGATE_TIER_ONE").await;

    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![expired_credential("c1")],
        FakeLauncher::new(),
    );

    let refresh = {
        let tokens = app.state.tokens.clone();
        tokio::spawn(async move { tokens.refresh_access_token("c1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    app.state
        .tokens
        .disable_credential("c1", "manual")
        .await
        .unwrap();
    refresh.await.unwrap().unwrap();

    let stored = app.credential("c1").await;
    assert!(!stored.active);
    assert_eq!(stored.ban_reason.as_deref(), Some("manual"));
    assert_eq!(stored.access_token.as_deref(), Some("at-fresh"));
    assert_eq!(stored.credits, 250);
}

#[tokio::test]
async fn test_acquire_refreshes_expired_access_token_once() {
    let flow = MockFlowServer::start().await;
    flow.mock_session_expect("st-c1", "at-fresh", "c1@example.com", 1, Duration::ZERO)
        .await;
    flow.mock_credits(40, "PAYGATE_TIER_TWO").await;

    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![expired_credential("c1")],
        FakeLauncher::new(),
    );

    let credential = app.state.tokens.acquire(Capability::Image).await.unwrap();
    assert_eq!(credential.id, "c1");
    assert_eq!(credential.access_token.as_deref(), Some("at-fresh"));
    assert!(credential.has_valid_access_token(chrono::Utc::now()));

    // A second acquire finds a valid token and does not exchange again.
    app.state.tokens.acquire(Capability::Image).await.unwrap();
    flow.verify().await;
}

#[tokio::test]
async fn test_revoked_session_disables_credential_during_acquire() {
    let flow = MockFlowServer::start().await;
    flow.mock_session_revoked("st-c1").await;

    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![expired_credential("c1")],
        FakeLauncher::new(),
    );

    let err = app.state.tokens.acquire(Capability::Image).await.unwrap_err();
    assert!(matches!(err, AppError::NoCapacity(_)));

    let stored = app.credential("c1").await;
    assert!(!stored.active);
    assert_eq!(stored.ban_reason.as_deref(), Some("auth_revoked"));
}

#[tokio::test]
async fn test_consecutive_failures_reach_threshold_and_disable() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![ready_credential("c1")],
        FakeLauncher::new(),
    );
    let tokens = &app.state.tokens;
    let failure = Outcome::Failure(ErrorKind::BackendTransient);

    tokens.record_outcome("c1", failure).await.unwrap();
    tokens.record_outcome("c1", failure).await.unwrap();
    assert!(app.credential("c1").await.active);

    tokens.record_outcome("c1", failure).await.unwrap();
    let stored = app.credential("c1").await;
    assert!(!stored.active);
    assert_eq!(
        stored.ban_reason.as_deref(),
        Some("backend_transient: 3 consecutive errors")
    );

    let err = tokens.select_credential(Capability::Image).await.unwrap_err();
    assert!(matches!(err, AppError::NoCapacity(_)));
}

#[tokio::test]
async fn test_success_resets_consecutive_errors() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![ready_credential("c1")],
        FakeLauncher::new(),
    );
    let tokens = &app.state.tokens;

    tokens
        .record_outcome("c1", Outcome::Failure(ErrorKind::Timeout))
        .await
        .unwrap();
    tokens
        .record_outcome("c1", Outcome::Failure(ErrorKind::CaptchaFailure))
        .await
        .unwrap();
    tokens.record_outcome("c1", Outcome::Success).await.unwrap();

    let stats = app.store.get_credential_stats("c1").await.unwrap();
    assert_eq!(stats.consecutive_error_count, 0);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.error_count, 2);
}

#[tokio::test]
async fn test_quota_disables_immediately() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![ready_credential("c1")],
        FakeLauncher::new(),
    );

    app.state
        .tokens
        .record_outcome("c1", Outcome::Failure(ErrorKind::QuotaExhausted))
        .await
        .unwrap();

    let stored = app.credential("c1").await;
    assert!(!stored.active);
    assert_eq!(stored.ban_reason.as_deref(), Some("quota_exhausted"));
}

#[tokio::test]
async fn test_client_faults_do_not_touch_stats() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![ready_credential("c1")],
        FakeLauncher::new(),
    );

    for _ in 0..5 {
        app.state
            .tokens
            .record_outcome("c1", Outcome::Failure(ErrorKind::Client))
            .await
            .unwrap();
    }

    let stats = app.store.get_credential_stats("c1").await.unwrap();
    assert_eq!(stats.consecutive_error_count, 0);
    assert!(app.credential("c1").await.active);
}

#[tokio::test]
async fn test_selection_prefers_fewest_errors_then_least_recent() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![ready_credential("c1"), ready_credential("c2")],
        FakeLauncher::new(),
    );
    let tokens = &app.state.tokens;

    tokens
        .record_outcome("c1", Outcome::Failure(ErrorKind::BackendTransient))
        .await
        .unwrap();
    assert_eq!(tokens.select_credential(Capability::Image).await.unwrap().id, "c2");

    tokens.record_outcome("c1", Outcome::Success).await.unwrap();
    // Both clean now; c2 was just used, so c1 is least recently used.
    assert_eq!(tokens.select_credential(Capability::Image).await.unwrap().id, "c1");
    assert_eq!(tokens.select_credential(Capability::Image).await.unwrap().id, "c2");
}

#[tokio::test]
async fn test_capability_and_credit_filters() {
    let flow = MockFlowServer::start().await;
    let mut image_only = ready_credential("c1");
    image_only.capabilities = [Capability::Image].into_iter().collect();
    let mut broke = ready_credential("c2");
    broke.credits = 0;

    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![image_only, broke],
        FakeLauncher::new(),
    );
    let tokens = &app.state.tokens;

    assert_eq!(tokens.select_credential(Capability::Image).await.unwrap().id, "c1");
    assert!(matches!(
        tokens.select_credential(Capability::Video).await,
        Err(AppError::NoCapacity(_))
    ));

    let summary = tokens.pool_summary().await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.selectable_image, 1);
    assert_eq!(summary.selectable_video, 0);
}

#[tokio::test]
async fn test_enable_clears_ban_and_stats() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![ready_credential("c1")],
        FakeLauncher::new(),
    );
    let tokens = &app.state.tokens;

    for _ in 0..3 {
        tokens
            .record_outcome("c1", Outcome::Failure(ErrorKind::BackendMalformed))
            .await
            .unwrap();
    }
    assert!(!app.credential("c1").await.active);

    let enabled = tokens.enable_credential("c1").await.unwrap();
    assert!(enabled.active);
    assert!(enabled.ban_reason.is_none());
    let stats = app.store.get_credential_stats("c1").await.unwrap();
    assert_eq!(stats.consecutive_error_count, 0);
    assert_eq!(tokens.select_credential(Capability::Image).await.unwrap().id, "c1");
}

#[tokio::test]
async fn test_seed_import_merges_accounts_by_email() {
    let flow = MockFlowServer::start().await;
    flow.mock_session_success("seed-a", "at-a", "shared@example.com").await;
    flow.mock_session_success("seed-b", "at-b", "shared@example.com").await;
    flow.mock_session_success("seed-c", "at-c", "other@example.com").await;
    flow.mock_credits(30, "PAYGATE_TIER_ONE").await;

    let app = TestApp::new(test_config(&flow.uri()), vec![], FakeLauncher::new());

    let path = std::env::temp_dir().join(format!("flowgate-seed-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        serde_json::json!([
            {"sessionToken": "seed-a"},
            {"sessionToken": "seed-b"},
            {"sessionToken": "seed-c", "capabilities": ["image"]}
        ])
        .to_string(),
    )
    .unwrap();

    let imported = app
        .state
        .tokens
        .import_seed_file(path.to_str().unwrap())
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(imported, 3);
    let all = app.store.get_all_credentials().await.unwrap();
    assert_eq!(all.len(), 2);

    let shared = all
        .iter()
        .find(|c| c.email.as_deref() == Some("shared@example.com"))
        .unwrap();
    assert_eq!(shared.session_token, "seed-b");
    assert_eq!(shared.access_token.as_deref(), Some("at-b"));
    assert_eq!(shared.credits, 30);

    let other = all
        .iter()
        .find(|c| c.email.as_deref() == Some("other@example.com"))
        .unwrap();
    assert!(!other.supports(Capability::Video));
}

#[tokio::test]
async fn test_refresh_pass_refreshes_due_and_disables_revoked() {
    let flow = MockFlowServer::start().await;
    flow.mock_session_success("st-c1", "at-fresh", "c1@example.com").await;
    flow.mock_session_revoked("st-c2").await;
    flow.mock_credits(70, "PAYGATE_TIER_ONE").await;

    let app = TestApp::new(
        test_config(&flow.uri()),
        vec![
            expired_credential("c1"),
            expired_credential("c2"),
            ready_credential("c3"),
        ],
        FakeLauncher::new(),
    );

    let refresher = TokenRefresher::new(app.state.tokens.clone(), Duration::from_secs(60));
    let report = refresher.run_once().await;

    assert_eq!(report.refreshed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.disabled, 1);
    assert_eq!(
        app.credential("c1").await.access_token.as_deref(),
        Some("at-fresh")
    );
    assert_eq!(
        app.credential("c2").await.ban_reason.as_deref(),
        Some("auth_revoked")
    );
    // c3 expires in six hours, outside the one-hour refresh window.
    assert_eq!(app.credential("c3").await.access_token.as_deref(), Some("at-c3"));
}

#[tokio::test]
async fn test_zero_interval_disables_background_refresh() {
    let flow = MockFlowServer::start().await;
    let app = TestApp::new(test_config(&flow.uri()), vec![], FakeLauncher::new());

    let refresher = TokenRefresher::new(app.state.tokens.clone(), Duration::ZERO);
    assert!(refresher.start().is_none());
}
