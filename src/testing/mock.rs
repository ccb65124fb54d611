//! Fake identity provider token endpoint

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::OidcError;
use crate::oidc::{TokenEndpointClient, TokenRequest, TokenResponse};

/// Scripted [`TokenEndpointClient`] that records every exchange
pub struct FakeTokenClient {
    response: Mutex<Result<TokenResponse, OidcError>>,
    requests: Mutex<Vec<TokenRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeTokenClient {
    /// Answer every exchange with `response`
    #[must_use]
    pub fn returning(response: TokenResponse) -> Self {
        Self {
            response: Mutex::new(Ok(response)),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Answer every exchange with an ID token and an access token
    #[must_use]
    pub fn returning_id_token(id_token: impl Into<String>) -> Self {
        Self::returning(Self::token_response(id_token.into()))
    }

    /// Fail every exchange with `error`
    #[must_use]
    pub fn failing(error: OidcError) -> Self {
        let client = Self::returning(TokenResponse::default());
        client.set_result(Err(error));
        client
    }

    /// Hold each exchange for `delay` before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_id_token(&self, id_token: impl Into<String>) {
        self.set_result(Ok(Self::token_response(id_token.into())));
    }

    pub fn set_result(&self, result: Result<TokenResponse, OidcError>) {
        if let Ok(mut response) = self.response.lock() {
            *response = result;
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_request(&self) -> Option<TokenRequest> {
        self.requests.lock().ok()?.last().cloned()
    }

    fn token_response(id_token: String) -> TokenResponse {
        TokenResponse {
            id_token: Some(id_token),
            access_token: Some("test-access-token".to_string()),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3600),
            ..TokenResponse::default()
        }
    }
}

impl Default for FakeTokenClient {
    fn default() -> Self {
        Self::failing(OidcError::TokenExchange("no response scripted".to_string()))
    }
}

#[async_trait]
impl TokenEndpointClient for FakeTokenClient {
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, OidcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response
            .lock()
            .map_err(|_| OidcError::TokenExchange("fake client poisoned".to_string()))?
            .clone()
    }
}
