mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use moodplay_lib::auth::{
    AuthError, AuthPhase, CredentialErrorTag, RefreshFailure, SpotifyTokenRefresher,
    TokenLifecycleManager,
};

use common::{expired_credential, live_credential, spotify_config, BASIC_AUTH};

fn manager(server: &MockServer) -> TokenLifecycleManager {
    TokenLifecycleManager::new(Arc::new(SpotifyTokenRefresher::new(
        reqwest::Client::new(),
        &spotify_config(server),
    )))
}

#[tokio::test]
async fn valid_credential_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let auth = manager(&server);
    auth.sign_in(live_credential());
    for _ in 0..5 {
        assert_eq!(auth.ensure_valid().await.unwrap().access_token, "live-token");
    }
}

#[tokio::test]
async fn refresh_sends_client_credentials_and_keeps_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header("authorization", BASIC_AUTH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = manager(&server);
    auth.sign_in(expired_credential());

    let fresh = auth.ensure_valid().await.unwrap();
    assert_eq!(fresh.access_token, "new-token");
    assert_eq!(fresh.refresh_token, "refresh-1");
    assert!(fresh.last_error.is_none());
    assert_eq!(auth.phase(), AuthPhase::Valid);
}

#[tokio::test]
async fn rotated_refresh_token_replaces_the_old_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-token",
            "expires_in": 3600,
            "refresh_token": "refresh-2"
        })))
        .mount(&server)
        .await;

    let auth = manager(&server);
    auth.sign_in(expired_credential());

    assert_eq!(auth.ensure_valid().await.unwrap().refresh_token, "refresh-2");
}

#[tokio::test]
async fn concurrent_callers_after_expiry_share_one_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "new-token", "expires_in": 3600}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let auth = manager(&server);
    auth.sign_in(expired_credential());

    let first = tokio::spawn({
        let auth = auth.clone();
        async move { auth.ensure_valid().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = tokio::spawn({
        let auth = auth.clone();
        async move { auth.ensure_valid().await }
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.access_token, "new-token");
}

#[tokio::test]
async fn rejected_refresh_is_terminal_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .expect(1)
        .mount(&server)
        .await;

    let auth = manager(&server);
    auth.sign_in(expired_credential());

    let err = auth.ensure_valid().await.unwrap_err();
    assert_eq!(err, AuthError::Refresh(RefreshFailure::Status(400)));
    assert_eq!(auth.phase(), AuthPhase::Invalid);
    assert!(!auth.is_signed_in());

    let kept = auth.current().unwrap();
    assert_eq!(kept.access_token, "stale-token");
    assert_eq!(kept.last_error, Some(CredentialErrorTag::RefreshAccessTokenError));

    for _ in 0..3 {
        assert_eq!(auth.ensure_valid().await.unwrap_err(), err);
    }
}

#[tokio::test]
async fn non_200_success_code_is_still_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let auth = manager(&server);
    auth.sign_in(expired_credential());

    assert_eq!(
        auth.ensure_valid().await.unwrap_err(),
        AuthError::Refresh(RefreshFailure::Status(204))
    );
}

#[tokio::test]
async fn garbage_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let auth = manager(&server);
    auth.sign_in(expired_credential());

    assert!(matches!(
        auth.ensure_valid().await.unwrap_err(),
        AuthError::Refresh(RefreshFailure::Malformed(_))
    ));
}
