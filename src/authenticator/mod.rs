//! OpenID Connect authorization-code flow driver
//!
//! [`OpenIdAuthenticator`] decides, per request, whether the caller is
//! already authenticated, must be sent to the identity provider, or is
//! returning from it. It knows nothing about the HTTP framework: the host
//! passes in the session id and request data and turns the returned
//! [`AuthOutcome`] into a response.
//!
//! A login attempt is recorded in the session as a [`PendingLogin`] keyed by
//! its `state`. The callback consumes that record under the session lock, so
//! a replayed or duplicated callback finds nothing and fails with
//! `StateMismatch` before any token exchange. The exchange itself runs
//! outside the lock; its result is committed only if the session is still
//! live and the attempt is still in flight.

mod state;

use std::sync::Arc;

use chrono::Duration;
use log::debug;

pub use state::{AuthOutcome, AuthState, CallbackParams};

use crate::error::OidcError;
use crate::login_service::LoginService;
use crate::oidc::{OpenIdConfiguration, OpenIdCredentials, SignatureVerifier, TokenEndpointClient, ValidationContext};
use crate::session::{AuthenticatedIdentity, PendingLogin, Session, SessionStore};
use crate::utils::{generate_csrf_token, generate_nonce, validate_post_auth_redirect, Clock, LoggingHelper, SystemClock};

/// Behavioural knobs of the authenticator
#[derive(Debug, Clone)]
pub struct AuthenticatorOptions {
    /// Where to land after login when the original URI is unusable
    pub landing_page: String,
    /// Local page that renders login failures; receives `?error=<code>`
    pub error_page: String,
    /// Local page shown after logout when no provider logout is possible
    pub logout_redirect: String,
    /// Absolute URL the provider should return to after its own logout
    pub post_logout_redirect_uri: Option<String>,
    /// Send and check a `nonce` with every authorization request
    pub use_nonce: bool,
    pub clock_skew: Duration,
    /// How long a login attempt waits for its callback
    pub pending_login_ttl: Duration,
    /// Treat the session as unauthenticated once the ID token's `exp` passes
    pub logout_when_id_token_expires: bool,
}

impl Default for AuthenticatorOptions {
    fn default() -> Self {
        Self {
            landing_page: "/".to_string(),
            error_page: "/error".to_string(),
            logout_redirect: "/".to_string(),
            post_logout_redirect_uri: None,
            use_nonce: true,
            clock_skew: Duration::seconds(crate::oidc::claims::DEFAULT_CLOCK_SKEW_SECONDS),
            pending_login_ttl: Duration::minutes(10),
            logout_when_id_token_expires: false,
        }
    }
}

pub struct OpenIdAuthenticator {
    configuration: Arc<OpenIdConfiguration>,
    token_client: Arc<dyn TokenEndpointClient>,
    sessions: Arc<dyn SessionStore>,
    login_service: LoginService,
    clock: Arc<dyn Clock>,
    verifier: Option<SignatureVerifier>,
    options: AuthenticatorOptions,
}

impl OpenIdAuthenticator {
    #[must_use]
    pub fn new(
        configuration: Arc<OpenIdConfiguration>,
        token_client: Arc<dyn TokenEndpointClient>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            configuration,
            token_client,
            sessions,
            login_service: LoginService::new(),
            clock: Arc::new(SystemClock),
            verifier: None,
            options: AuthenticatorOptions::default(),
        }
    }

    #[must_use]
    pub fn with_login_service(mut self, login_service: LoginService) -> Self {
        self.login_service = login_service;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verify ID token signatures before trusting their claims
    #[must_use]
    pub fn with_signature_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: AuthenticatorOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn configuration(&self) -> &OpenIdConfiguration {
        &self.configuration
    }

    #[must_use]
    pub fn options(&self) -> &AuthenticatorOptions {
        &self.options
    }

    /// Whether `path` is where the identity provider sends the browser back
    #[must_use]
    pub fn is_callback(&self, path: &str) -> bool {
        path == self.configuration.redirect_path()
    }

    /// Identity bound to the session, without challenging
    pub async fn current_identity(&self, session_id: Option<&str>) -> Option<Arc<AuthenticatedIdentity>> {
        let session = self.sessions.get(session_id?).await?;
        let data = session.lock().await;
        data.identity()
            .filter(|identity| !self.identity_expired(identity))
            .cloned()
    }

    /// Entry check for a protected request
    ///
    /// Returns `Authenticated` when the session already carries a live
    /// identity, otherwise starts a new login attempt and returns a
    /// `Challenge` pointing at the authorization endpoint.
    pub async fn validate_request(&self, session_id: Option<&str>, request_uri: &str) -> AuthOutcome {
        let existing = match session_id {
            Some(id) => self.sessions.get(id).await,
            None => None,
        };

        if let Some(session) = &existing {
            let mut data = session.lock().await;
            if let Some(identity) = data.identity().cloned() {
                if !self.identity_expired(&identity) {
                    return AuthOutcome::Authenticated {
                        session_id: session.id().to_string(),
                        identity,
                        redirect: None,
                    };
                }
                debug!("ID token for {} expired, re-authenticating", identity.principal);
                data.clear_identity();
            }
        }

        let session = match existing {
            Some(session) => session,
            None => self.sessions.create().await,
        };
        self.challenge(&session, request_uri).await
    }

    async fn challenge(&self, session: &Session, request_uri: &str) -> AuthOutcome {
        let state = generate_csrf_token();
        let nonce = self.options.use_nonce.then(|| generate_nonce(16));

        let location = match self.configuration.authorization_url(&state, nonce.as_deref()) {
            Ok(location) => location,
            Err(error) => return self.fail(error),
        };

        session.lock().await.add_pending(PendingLogin::new(
            state,
            nonce,
            request_uri.to_string(),
            self.clock.now(),
        ));
        LoggingHelper::log_challenge_issued(request_uri, self.options.use_nonce);

        AuthOutcome::Challenge {
            session_id: session.id().to_string(),
            location,
        }
    }

    /// Complete a login from the identity provider's redirect
    ///
    /// Every failure clears the session's pending attempts and yields a
    /// `Failed` outcome pointing at the error page.
    pub async fn handle_callback(&self, session_id: Option<&str>, params: &CallbackParams) -> AuthOutcome {
        let session = match session_id {
            Some(id) => self.sessions.get(id).await,
            None => None,
        };

        match self.complete_login(session.as_deref(), params).await {
            Ok((session_id, identity, target)) => {
                LoggingHelper::log_login_success(&identity.principal, &identity.roles);
                AuthOutcome::Authenticated {
                    session_id,
                    identity,
                    redirect: Some(target),
                }
            }
            Err(error) => {
                if let Some(session) = &session {
                    session.lock().await.clear_pending();
                }
                self.fail(error)
            }
        }
    }

    async fn complete_login(
        &self,
        session: Option<&Session>,
        params: &CallbackParams,
    ) -> Result<(String, Arc<AuthenticatedIdentity>, String), OidcError> {
        if let Some(error) = &params.error {
            return Err(OidcError::IdentityProvider {
                error: error.clone(),
                description: params.error_description.clone().unwrap_or_default(),
            });
        }

        let session = session.ok_or_else(|| OidcError::StateMismatch("no session for callback".to_string()))?;
        let state = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OidcError::StateMismatch("callback carries no state".to_string()))?;

        let (pending, code) = {
            let mut data = session.lock().await;
            let pending = data
                .take_pending(state)
                .ok_or_else(|| OidcError::StateMismatch("no login attempt matches state".to_string()))?;
            if pending.is_expired(self.clock.now(), self.options.pending_login_ttl) {
                return Err(OidcError::StateMismatch("login attempt expired".to_string()));
            }
            let code = params
                .code
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| OidcError::InvalidCallback("callback carries no code".to_string()))?;
            data.begin_attempt(pending.attempt_id);
            (pending, code)
        };
        debug!("Login attempt {} is {}", pending.attempt_id, AuthState::CallbackReceived);

        let result = self.redeem(code, pending.nonce.as_deref()).await;

        let identity = match result {
            Ok(identity) => identity,
            Err(error) => {
                session.lock().await.finish_attempt(pending.attempt_id);
                return Err(error);
            }
        };

        // Fresh session id once authenticated; the pre-login id is retired.
        // Store calls lock sessions themselves, so no guard is held across them.
        let rotated = self.sessions.create().await;
        let committable = session.lock().await.finish_attempt(pending.attempt_id);
        if !committable {
            self.sessions.invalidate(rotated.id()).await;
            return Err(OidcError::Session("session ended while the login was in progress".to_string()));
        }
        let identity = {
            let mut data = rotated.lock().await;
            data.set_identity(identity);
            data.identity()
                .cloned()
                .ok_or_else(|| OidcError::Session("identity lost during session rotation".to_string()))?
        };
        self.sessions.invalidate(session.id()).await;

        let target = validate_post_auth_redirect(&pending.original_uri)
            .unwrap_or_else(|| self.options.landing_page.clone());
        Ok((rotated.id().to_string(), identity, target))
    }

    async fn redeem(&self, code: String, nonce: Option<&str>) -> Result<AuthenticatedIdentity, OidcError> {
        let now = self.clock.now();
        let mut credentials = OpenIdCredentials::new(code);
        let context = ValidationContext {
            nonce,
            now,
            clock_skew: self.options.clock_skew,
            verifier: self.verifier.as_ref(),
        };
        credentials
            .redeem(&self.configuration, self.token_client.as_ref(), &context)
            .await?;
        self.login_service.login(credentials, now)
    }

    /// End the session and point the browser at the provider's logout when possible
    pub async fn logout(&self, session_id: Option<&str>) -> AuthOutcome {
        let mut identity = None;
        if let Some(id) = session_id {
            if let Some(session) = self.sessions.get(id).await {
                identity = session.lock().await.identity().cloned();
            }
            self.sessions.invalidate(id).await;
        }

        let provider_logout = identity.as_ref().and_then(|identity| {
            self.configuration.end_session_url(
                Some(&identity.id_token),
                self.options.post_logout_redirect_uri.as_deref(),
            )
        });
        LoggingHelper::log_logout(
            identity.as_ref().map(|i| i.principal.as_str()),
            provider_logout.is_some(),
        );

        AuthOutcome::LoggedOut {
            location: provider_logout.unwrap_or_else(|| self.options.logout_redirect.clone()),
        }
    }

    fn identity_expired(&self, identity: &AuthenticatedIdentity) -> bool {
        self.options.logout_when_id_token_expires && identity.is_expired(self.clock.now())
    }

    fn fail(&self, error: OidcError) -> AuthOutcome {
        LoggingHelper::log_login_failure(&error);
        let separator = if self.options.error_page.contains('?') { '&' } else { '?' };
        AuthOutcome::Failed {
            location: format!("{}{separator}error={}", self.options.error_page, error.error_code()),
            error,
        }
    }
}

#[cfg(test)]
mod tests;
