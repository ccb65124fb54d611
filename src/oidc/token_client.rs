//! Authorization-code redemption at the token endpoint
//!
//! The authenticator only sees the [`TokenEndpointClient`] trait so tests can
//! substitute a fake provider. [`HttpTokenClient`] is the production
//! implementation over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::OidcError;
use crate::utils::LoggingHelper;

pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters of one `authorization_code` grant
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub token_endpoint: String,
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: String,
}

impl TokenRequest {
    /// Form fields sent in the POST body
    #[must_use]
    pub fn form(&self) -> [(&'static str, &str); 5] {
        [
            ("grant_type", "authorization_code"),
            ("code", &self.code),
            ("redirect_uri", &self.redirect_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ]
    }
}

/// Successful token endpoint response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    pub id_token: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

/// Server-to-server call that redeems an authorization code
#[async_trait]
pub trait TokenEndpointClient: Send + Sync {
    /// Redeem the code in `request`
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` when the call fails or the response cannot be parsed
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, OidcError>;
}

/// `reqwest`-backed token client with a request timeout
#[derive(Clone)]
pub struct HttpTokenClient {
    http_client: reqwest::Client,
}

impl HttpTokenClient {
    /// Create a client whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` if the TLS backend cannot be initialised
    pub fn new(timeout: Duration) -> Result<Self, OidcError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OidcError::TokenExchange(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl TokenEndpointClient for HttpTokenClient {
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, OidcError> {
        LoggingHelper::log_token_exchange_start(&request.token_endpoint);

        let response = self
            .http_client
            .post(&request.token_endpoint)
            .form(&request.form())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OidcError::TokenExchange("token endpoint timed out".to_string())
                } else {
                    OidcError::TokenExchange(format!("Failed to exchange code for token: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OidcError::TokenExchange(format!(
                "Token exchange failed with status {status}: {error_text}"
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| OidcError::TokenExchange(format!("Failed to read response text: {e}")))?;

        serde_json::from_str(&response_text)
            .map_err(|e| OidcError::TokenExchange(format!("Failed to parse token response: {e}")))
    }
}
