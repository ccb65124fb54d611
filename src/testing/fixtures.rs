//! Test fixtures providing a configured authenticator
//!
//! [`TestHarness`] wires an [`OpenIdAuthenticator`] to a [`FakeTokenClient`],
//! an in-memory session store and a pinned clock so whole login flows can be
//! driven without a network or a real identity provider.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use url::Url;

use super::builders::IdTokenBuilder;
use super::constants::{TEST_CLIENT_ID, TEST_CLIENT_SECRET, TEST_ISSUER, TEST_REDIRECT_URI};
use super::mock::FakeTokenClient;
use crate::authenticator::{AuthOutcome, AuthenticatorOptions, CallbackParams, OpenIdAuthenticator};
use crate::login_service::LoginService;
use crate::oidc::OpenIdConfiguration;
use crate::session::InMemorySessionStore;
use crate::utils::{Clock, FixedClock};

/// Provider configuration with explicit endpoints under [`TEST_ISSUER`]
///
/// # Panics
///
/// Never panics; the endpoints are valid URLs
#[must_use]
pub fn test_configuration() -> OpenIdConfiguration {
    OpenIdConfiguration::builder(TEST_ISSUER, TEST_CLIENT_ID, TEST_CLIENT_SECRET, TEST_REDIRECT_URI)
        .authorization_endpoint(format!("{TEST_ISSUER}/authorize"))
        .token_endpoint(format!("{TEST_ISSUER}/token"))
        .end_session_endpoint(format!("{TEST_ISSUER}/logout"))
        .build()
        .expect("test configuration is valid")
}

/// First value of a query parameter in `url`
#[must_use]
pub fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// A login attempt as seen by the browser after the authorization redirect
#[derive(Debug, Clone)]
pub struct Challenge {
    pub session_id: String,
    pub location: String,
    pub state: String,
    pub nonce: Option<String>,
}

pub struct TestHarness {
    pub authenticator: Arc<OpenIdAuthenticator>,
    pub token_client: Arc<FakeTokenClient>,
    pub sessions: Arc<InMemorySessionStore>,
    pub clock: Arc<FixedClock>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    #[must_use]
    pub fn new() -> Self {
        Self::with(LoginService::new(), AuthenticatorOptions::default())
    }

    #[must_use]
    pub fn with(login_service: LoginService, options: AuthenticatorOptions) -> Self {
        Self::with_token_client(login_service, options, FakeTokenClient::default())
    }

    #[must_use]
    pub fn with_token_client(
        login_service: LoginService,
        options: AuthenticatorOptions,
        token_client: FakeTokenClient,
    ) -> Self {
        let start = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_else(Utc::now);
        let clock = Arc::new(FixedClock::new(start));
        let sessions = Arc::new(InMemorySessionStore::new(Duration::hours(24), clock.clone()));
        let token_client = Arc::new(token_client);
        let authenticator = OpenIdAuthenticator::new(
            Arc::new(test_configuration()),
            token_client.clone(),
            sessions.clone(),
        )
        .with_login_service(login_service)
        .with_clock(clock.clone())
        .with_options(options);

        Self {
            authenticator: Arc::new(authenticator),
            token_client,
            sessions,
            clock,
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Valid ID token claims for the test client, carrying `nonce`
    #[must_use]
    pub fn id_token(&self, nonce: Option<&str>) -> IdTokenBuilder {
        IdTokenBuilder::new(self.now()).nonce(nonce)
    }

    /// Request a protected URI without a session and capture the redirect
    ///
    /// # Panics
    ///
    /// Panics if the authenticator does not answer with a challenge
    pub async fn challenge(&self, request_uri: &str) -> Challenge {
        self.challenge_in(None, request_uri).await
    }

    /// Same as [`Self::challenge`], reusing an existing session
    ///
    /// # Panics
    ///
    /// Panics if the authenticator does not answer with a challenge
    pub async fn challenge_in(&self, session_id: Option<&str>, request_uri: &str) -> Challenge {
        match self.authenticator.validate_request(session_id, request_uri).await {
            AuthOutcome::Challenge { session_id, location } => Challenge {
                state: query_param(&location, "state").expect("authorization URL carries state"),
                nonce: query_param(&location, "nonce"),
                session_id,
                location,
            },
            other => panic!("expected a challenge, got {other:?}"),
        }
    }

    /// Deliver the provider's redirect for `challenge` with a fixed code
    pub async fn callback(&self, challenge: &Challenge) -> AuthOutcome {
        let params = CallbackParams {
            code: Some("test-authorization-code".to_string()),
            state: Some(challenge.state.clone()),
            ..CallbackParams::default()
        };
        self.authenticator
            .handle_callback(Some(&challenge.session_id), &params)
            .await
    }

    /// Full login for `request_uri` with a valid token; returns the callback outcome
    pub async fn login(&self, request_uri: &str) -> AuthOutcome {
        let challenge = self.challenge(request_uri).await;
        self.token_client
            .set_id_token(self.id_token(challenge.nonce.as_deref()).sign());
        self.callback(&challenge).await
    }
}
