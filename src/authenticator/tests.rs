use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde_json::json;

use super::*;
use crate::login_service::LocalRoleStore;
use crate::session::SessionStore;
use crate::testing::constants::{TEST_CLIENT_ID, TEST_EMAIL, TEST_REDIRECT_URI, TEST_SUBJECT};
use crate::testing::{query_param, FakeTokenClient, TestHarness};

fn authenticated(outcome: &AuthOutcome) -> (&str, &Arc<AuthenticatedIdentity>) {
    match outcome {
        AuthOutcome::Authenticated {
            session_id, identity, ..
        } => (session_id.as_str(), identity),
        other => panic!("expected authenticated outcome, got {other:?}"),
    }
}

fn error_code(outcome: &AuthOutcome) -> &'static str {
    outcome
        .error()
        .map(OidcError::error_code)
        .unwrap_or_else(|| panic!("expected failure, got {outcome:?}"))
}

#[tokio::test]
async fn test_unauthenticated_request_is_challenged() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;

    let location = &challenge.location;
    assert!(location.starts_with("https://idp.example.com/authorize?"));
    assert_eq!(query_param(location, "response_type").as_deref(), Some("code"));
    assert_eq!(query_param(location, "client_id").as_deref(), Some(TEST_CLIENT_ID));
    assert_eq!(query_param(location, "redirect_uri").as_deref(), Some(TEST_REDIRECT_URI));
    assert_eq!(query_param(location, "scope").as_deref(), Some("openid email profile"));
    assert_eq!(challenge.state.len(), 32);
    assert!(challenge.nonce.is_some());

    let session = harness.sessions.get(&challenge.session_id).await.unwrap();
    assert_eq!(session.lock().await.pending_count(), 1);
    assert_eq!(harness.token_client.call_count(), 0);
}

#[tokio::test]
async fn test_challenges_use_fresh_state() {
    let harness = TestHarness::new();
    let first = harness.challenge("/profile").await;
    let second = harness.challenge_in(Some(&first.session_id), "/admin").await;
    assert_eq!(first.session_id, second.session_id);
    assert_ne!(first.state, second.state);
    assert_ne!(first.nonce, second.nonce);
}

#[tokio::test]
async fn test_nonce_can_be_disabled() {
    let options = AuthenticatorOptions {
        use_nonce: false,
        ..AuthenticatorOptions::default()
    };
    let harness = TestHarness::with(LoginService::new(), options);
    let challenge = harness.challenge("/profile").await;
    assert!(challenge.nonce.is_none());

    harness.token_client.set_id_token(harness.id_token(None).sign());
    let outcome = harness.callback(&challenge).await;
    assert_eq!(outcome.state(), AuthState::Authenticated);
}

#[tokio::test]
async fn test_successful_login_redirects_to_original_uri() {
    let harness = TestHarness::new();
    let outcome = harness.login("/profile").await;

    assert_eq!(outcome.state(), AuthState::Authenticated);
    assert_eq!(outcome.location(), Some("/profile"));
    let (session_id, identity) = authenticated(&outcome);
    assert_eq!(identity.principal, TEST_SUBJECT);
    assert_eq!(identity.user_info.email(), Some(TEST_EMAIL));
    assert_eq!(identity.roles, BTreeSet::from(["authenticated".to_string()]));

    let request = harness.token_client.last_request().unwrap();
    assert_eq!(request.code, "test-authorization-code");
    assert_eq!(request.redirect_uri, TEST_REDIRECT_URI);

    // Subsequent requests are authenticated without another exchange
    let again = harness.authenticator.validate_request(Some(session_id), "/profile").await;
    assert_eq!(again.state(), AuthState::Authenticated);
    assert_eq!(again.location(), None);
    assert_eq!(harness.token_client.call_count(), 1);
}

#[tokio::test]
async fn test_session_id_rotates_on_login() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;
    harness
        .token_client
        .set_id_token(harness.id_token(challenge.nonce.as_deref()).sign());
    let outcome = harness.callback(&challenge).await;

    let (session_id, _) = authenticated(&outcome);
    assert_ne!(session_id, challenge.session_id);
    assert!(harness.sessions.get(&challenge.session_id).await.is_none());
}

#[tokio::test]
async fn test_unsafe_original_uri_falls_back_to_landing_page() {
    let harness = TestHarness::new();
    let outcome = harness.login("https://evil.example.com/").await;
    assert_eq!(outcome.location(), Some("/"));
}

#[tokio::test]
async fn test_state_mismatch_never_exchanges() {
    let harness = TestHarness::new();
    let mut challenge = harness.challenge("/profile").await;
    challenge.state = "forged".to_string();

    let outcome = harness.callback(&challenge).await;
    assert_eq!(outcome.state(), AuthState::Error);
    assert_eq!(error_code(&outcome), "state_mismatch");
    assert_eq!(outcome.location(), Some("/error?error=state_mismatch"));
    assert_eq!(harness.token_client.call_count(), 0);

    // Failure clears the pending attempt
    let session = harness.sessions.get(&challenge.session_id).await.unwrap();
    assert_eq!(session.lock().await.pending_count(), 0);
}

#[tokio::test]
async fn test_callback_without_session_or_state() {
    let harness = TestHarness::new();
    let params = CallbackParams {
        code: Some("c".to_string()),
        state: Some("s".to_string()),
        ..CallbackParams::default()
    };
    let outcome = harness.authenticator.handle_callback(None, &params).await;
    assert_eq!(error_code(&outcome), "state_mismatch");

    let challenge = harness.challenge("/profile").await;
    let params = CallbackParams {
        code: Some("c".to_string()),
        ..CallbackParams::default()
    };
    let outcome = harness
        .authenticator
        .handle_callback(Some(&challenge.session_id), &params)
        .await;
    assert_eq!(error_code(&outcome), "state_mismatch");
    assert_eq!(harness.token_client.call_count(), 0);
}

#[tokio::test]
async fn test_callback_without_code() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;
    let params = CallbackParams {
        state: Some(challenge.state.clone()),
        ..CallbackParams::default()
    };
    let outcome = harness
        .authenticator
        .handle_callback(Some(&challenge.session_id), &params)
        .await;
    assert_eq!(error_code(&outcome), "invalid_callback");
    assert_eq!(harness.token_client.call_count(), 0);
}

#[tokio::test]
async fn test_identity_provider_error_skips_exchange() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;
    let params = CallbackParams {
        state: Some(challenge.state.clone()),
        error: Some("access_denied".to_string()),
        error_description: Some("user cancelled".to_string()),
        ..CallbackParams::default()
    };
    let outcome = harness
        .authenticator
        .handle_callback(Some(&challenge.session_id), &params)
        .await;

    assert_eq!(outcome.state(), AuthState::Error);
    assert_eq!(
        outcome.error(),
        Some(&OidcError::IdentityProvider {
            error: "access_denied".to_string(),
            description: "user cancelled".to_string(),
        })
    );
    assert_eq!(harness.token_client.call_count(), 0);
}

#[tokio::test]
async fn test_replayed_callback_exchanges_once() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;
    harness
        .token_client
        .set_id_token(harness.id_token(challenge.nonce.as_deref()).sign());

    let first = harness.callback(&challenge).await;
    assert_eq!(first.state(), AuthState::Authenticated);

    let replay = harness.callback(&challenge).await;
    assert_eq!(error_code(&replay), "state_mismatch");
    assert_eq!(harness.token_client.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_callbacks_exchange_once() {
    let harness = TestHarness::with_token_client(
        LoginService::new(),
        AuthenticatorOptions::default(),
        FakeTokenClient::default().with_delay(StdDuration::from_millis(50)),
    );
    let challenge = harness.challenge("/profile").await;
    harness
        .token_client
        .set_id_token(harness.id_token(challenge.nonce.as_deref()).sign());

    let (a, b) = tokio::join!(harness.callback(&challenge), harness.callback(&challenge));
    let states = [a.state(), b.state()];
    assert!(states.contains(&AuthState::Authenticated));
    assert!(states.contains(&AuthState::Error));
    assert_eq!(harness.token_client.call_count(), 1);
}

#[tokio::test]
async fn test_expired_pending_login_is_rejected() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;
    harness.clock.advance(Duration::minutes(11));
    harness
        .token_client
        .set_id_token(harness.id_token(challenge.nonce.as_deref()).sign());

    let outcome = harness.callback(&challenge).await;
    assert_eq!(error_code(&outcome), "state_mismatch");
    assert_eq!(harness.token_client.call_count(), 0);
}

#[tokio::test]
async fn test_nonce_mismatch_is_rejected() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;
    harness
        .token_client
        .set_id_token(harness.id_token(Some("some-other-nonce")).sign());

    let outcome = harness.callback(&challenge).await;
    assert_eq!(
        outcome.error(),
        Some(&OidcError::claim("nonce", "does not match the authorization request"))
    );
    assert_eq!(outcome.location(), Some("/error?error=invalid_claims"));
}

#[tokio::test]
async fn test_wrong_issuer_and_audience_are_rejected() {
    let harness = TestHarness::new();

    let challenge = harness.challenge("/profile").await;
    harness.token_client.set_id_token(
        harness
            .id_token(challenge.nonce.as_deref())
            .claim("iss", json!("https://evil.example.com"))
            .sign(),
    );
    assert_eq!(error_code(&harness.callback(&challenge).await), "invalid_claims");

    let challenge = harness.challenge("/profile").await;
    harness.token_client.set_id_token(
        harness
            .id_token(challenge.nonce.as_deref())
            .claim("aud", json!("another-client"))
            .sign(),
    );
    assert_eq!(error_code(&harness.callback(&challenge).await), "invalid_claims");
}

#[tokio::test]
async fn test_expired_id_token_is_rejected() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;
    harness.token_client.set_id_token(
        harness
            .id_token(challenge.nonce.as_deref())
            .expires_at(harness.now() - Duration::minutes(10))
            .sign(),
    );
    let outcome = harness.callback(&challenge).await;
    assert_eq!(error_code(&outcome), "invalid_claims");

    let session = harness.sessions.get(&challenge.session_id).await.unwrap();
    assert!(session.lock().await.identity().is_none());
}

#[tokio::test]
async fn test_token_exchange_failure() {
    let harness = TestHarness::with_token_client(
        LoginService::new(),
        AuthenticatorOptions::default(),
        FakeTokenClient::failing(OidcError::TokenExchange("status 500".to_string())),
    );
    let challenge = harness.challenge("/profile").await;
    let outcome = harness.callback(&challenge).await;
    assert_eq!(outcome.location(), Some("/error?error=token_exchange_failed"));
    assert_eq!(harness.token_client.call_count(), 1);
}

#[tokio::test]
async fn test_malformed_id_token() {
    let harness = TestHarness::new();
    let challenge = harness.challenge("/profile").await;
    harness.token_client.set_id_token("not-a-jwt");
    let outcome = harness.callback(&challenge).await;
    assert_eq!(error_code(&outcome), "malformed_token");
}

#[tokio::test]
async fn test_logout_during_exchange_discards_identity() {
    let harness = TestHarness::with_token_client(
        LoginService::new(),
        AuthenticatorOptions::default(),
        FakeTokenClient::default().with_delay(StdDuration::from_millis(100)),
    );
    let challenge = harness.challenge("/profile").await;
    harness
        .token_client
        .set_id_token(harness.id_token(challenge.nonce.as_deref()).sign());

    let authenticator = harness.authenticator.clone();
    let session_id = challenge.session_id.clone();
    let logout = async move {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        authenticator.logout(Some(&session_id)).await
    };

    let (outcome, logged_out) = tokio::join!(harness.callback(&challenge), logout);
    assert_eq!(logged_out.state(), AuthState::Unauthenticated);
    assert_eq!(error_code(&outcome), "session_error");
    assert_eq!(harness.sessions.len().await, 0);
}

#[tokio::test]
async fn test_session_expiring_during_exchange_fails_cleanly() {
    let harness = TestHarness::with_token_client(
        LoginService::new(),
        AuthenticatorOptions::default(),
        FakeTokenClient::default().with_delay(StdDuration::from_millis(100)),
    );
    let first = harness.challenge("/").await;
    harness.clock.advance(Duration::hours(24) - Duration::minutes(1));
    let challenge = harness.challenge_in(Some(&first.session_id), "/profile").await;
    assert_eq!(challenge.session_id, first.session_id);
    harness
        .token_client
        .set_id_token(harness.id_token(challenge.nonce.as_deref()).sign());

    // The session outlives max_age while the token request is in flight
    let clock = harness.clock.clone();
    let expire = async move {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        clock.advance(Duration::minutes(2));
    };

    let (outcome, ()) = tokio::time::timeout(
        StdDuration::from_secs(3),
        async { tokio::join!(harness.callback(&challenge), expire) },
    )
    .await
    .expect("callback completes once the session has expired");

    assert_eq!(error_code(&outcome), "session_error");
    assert_eq!(harness.token_client.call_count(), 1);
    assert!(harness.sessions.is_empty().await);
}

#[tokio::test]
async fn test_logout_redirects_to_end_session_endpoint() {
    let options = AuthenticatorOptions {
        post_logout_redirect_uri: Some("http://localhost:8080/".to_string()),
        ..AuthenticatorOptions::default()
    };
    let harness = TestHarness::with(LoginService::new(), options);
    let outcome = harness.login("/profile").await;
    let (session_id, identity) = authenticated(&outcome);
    let id_token = identity.id_token.clone();
    let session_id = session_id.to_string();

    let logged_out = harness.authenticator.logout(Some(&session_id)).await;
    let location = logged_out.location().unwrap();
    assert!(location.starts_with("https://idp.example.com/logout?"));
    assert_eq!(query_param(location, "id_token_hint"), Some(id_token));
    assert_eq!(
        query_param(location, "post_logout_redirect_uri").as_deref(),
        Some("http://localhost:8080/")
    );
    assert_eq!(query_param(location, "client_id").as_deref(), Some(TEST_CLIENT_ID));

    // The old session no longer authenticates
    let after = harness.authenticator.validate_request(Some(&session_id), "/profile").await;
    assert_eq!(after.state(), AuthState::AuthRequested);
}

#[tokio::test]
async fn test_logout_without_session_is_local() {
    let harness = TestHarness::new();
    let outcome = harness.authenticator.logout(None).await;
    assert_eq!(outcome.location(), Some("/"));
}

#[tokio::test]
async fn test_identity_expiry_policy() {
    let options = AuthenticatorOptions {
        logout_when_id_token_expires: true,
        ..AuthenticatorOptions::default()
    };
    let harness = TestHarness::with(LoginService::new(), options);
    let outcome = harness.login("/profile").await;
    let session_id = authenticated(&outcome).0.to_string();

    harness.clock.advance(Duration::minutes(30));
    let still = harness.authenticator.validate_request(Some(&session_id), "/profile").await;
    assert_eq!(still.state(), AuthState::Authenticated);

    harness.clock.advance(Duration::minutes(31));
    let expired = harness.authenticator.validate_request(Some(&session_id), "/profile").await;
    assert_eq!(expired.state(), AuthState::AuthRequested);
}

#[tokio::test]
async fn test_identity_outlives_token_by_default() {
    let harness = TestHarness::new();
    let outcome = harness.login("/profile").await;
    let session_id = authenticated(&outcome).0.to_string();
    harness.clock.advance(Duration::hours(2));
    let again = harness.authenticator.validate_request(Some(&session_id), "/profile").await;
    assert_eq!(again.state(), AuthState::Authenticated);
}

#[tokio::test]
async fn test_local_roles_are_merged() {
    let mut store = LocalRoleStore::new();
    store.insert(TEST_EMAIL, ["admin"]);
    let harness = TestHarness::with(
        LoginService::new().with_role_source(store),
        AuthenticatorOptions::default(),
    );
    let outcome = harness.login("/admin").await;
    let (_, identity) = authenticated(&outcome);
    assert!(identity.has_role("admin"));
    assert!(identity.has_role("authenticated"));
}

#[tokio::test]
async fn test_unknown_users_can_be_refused() {
    let mut store = LocalRoleStore::new();
    store.insert("someone-else", ["admin"]);
    let harness = TestHarness::with(
        LoginService::new()
            .with_role_source(store)
            .authenticate_new_users(false),
        AuthenticatorOptions::default(),
    );
    let outcome = harness.login("/profile").await;
    assert_eq!(error_code(&outcome), "user_not_permitted");
}

#[tokio::test]
async fn test_is_callback() {
    let harness = TestHarness::new();
    assert!(harness.authenticator.is_callback("/j_security_check"));
    assert!(!harness.authenticator.is_callback("/profile"));
}

#[tokio::test]
async fn test_current_identity() {
    let harness = TestHarness::new();
    assert!(harness.authenticator.current_identity(None).await.is_none());
    let outcome = harness.login("/").await;
    let session_id = authenticated(&outcome).0.to_string();
    let identity = harness.authenticator.current_identity(Some(&session_id)).await.unwrap();
    assert_eq!(identity.principal, TEST_SUBJECT);
}
