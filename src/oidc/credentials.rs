//! Credentials carried through one login attempt
//!
//! Starts life holding only the authorization code from the callback and,
//! once redeemed, holds the validated ID token and its claims.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::error::OidcError;
use crate::oidc::claims::{self, ClaimExpectations};
use crate::oidc::configuration::OpenIdConfiguration;
use crate::oidc::jwt::{self, Claims};
use crate::oidc::signature::SignatureVerifier;
use crate::oidc::token_client::{TokenEndpointClient, TokenRequest};
use crate::utils::LoggingHelper;

/// Inputs to ID token validation that vary per attempt
pub struct ValidationContext<'a> {
    pub nonce: Option<&'a str>,
    pub now: DateTime<Utc>,
    pub clock_skew: Duration,
    pub verifier: Option<&'a SignatureVerifier>,
}

#[derive(Debug, Clone)]
pub struct OpenIdCredentials {
    authorization_code: Option<String>,
    id_token: Option<String>,
    claims: Option<Claims>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl OpenIdCredentials {
    #[must_use]
    pub fn new(authorization_code: impl Into<String>) -> Self {
        Self {
            authorization_code: Some(authorization_code.into()),
            id_token: None,
            claims: None,
            access_token: None,
            refresh_token: None,
        }
    }

    /// Exchange the authorization code and validate the returned ID token
    ///
    /// The code is consumed whether or not the exchange succeeds.
    ///
    /// # Errors
    ///
    /// - `TokenExchange` if the code was already redeemed, the call fails, or no ID token is returned
    /// - `MalformedToken` if the ID token cannot be decoded
    /// - `InvalidSignature` if a verifier is configured and rejects the token
    /// - `ClaimValidation` if any claim check fails
    pub async fn redeem(
        &mut self,
        configuration: &OpenIdConfiguration,
        client: &dyn TokenEndpointClient,
        context: &ValidationContext<'_>,
    ) -> Result<(), OidcError> {
        let code = self
            .authorization_code
            .take()
            .ok_or_else(|| OidcError::TokenExchange("authorization code already redeemed".to_string()))?;

        let request = TokenRequest {
            token_endpoint: configuration.token_endpoint().to_string(),
            code,
            redirect_uri: configuration.redirect_uri().to_string(),
            client_id: configuration.client_id().to_string(),
            client_secret: configuration.client_secret().to_string(),
        };
        let response = client.exchange(&request).await?;

        let id_token = response
            .id_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| OidcError::TokenExchange("response did not include an id_token".to_string()))?;

        LoggingHelper::log_token_exchange_summary(
            id_token.len(),
            response.access_token.is_some(),
            response.refresh_token.is_some(),
            response.token_type.as_deref(),
        );

        let decoded = jwt::decode(&id_token)?;
        if let Some(verifier) = context.verifier {
            verifier.verify(&decoded).await?;
        }

        let expectations = ClaimExpectations::new(configuration.issuer(), configuration.client_id())
            .with_nonce(context.nonce)
            .with_clock_skew(context.clock_skew);
        claims::validate(&decoded.claims, &expectations, context.now)?;

        self.id_token = Some(id_token);
        self.claims = Some(decoded.claims);
        self.access_token = response.access_token;
        self.refresh_token = response.refresh_token;
        Ok(())
    }

    #[must_use]
    pub fn is_redeemed(&self) -> bool {
        self.claims.is_some()
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.as_ref()?.get("sub")?.as_str()
    }

    #[must_use]
    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// `exp` claim of the redeemed ID token
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.claims.as_ref()?.get("exp").and_then(Value::as_i64)?;
        DateTime::from_timestamp(exp, 0)
    }

    /// Release token material once the identity has been established
    #[must_use]
    pub fn into_parts(self) -> (Option<String>, Option<Claims>) {
        (self.id_token, self.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::token_client::TokenResponse;
    use crate::testing::{test_configuration, FakeTokenClient, IdTokenBuilder};

    fn context(now: DateTime<Utc>) -> ValidationContext<'static> {
        ValidationContext {
            nonce: None,
            now,
            clock_skew: Duration::seconds(30),
            verifier: None,
        }
    }

    #[tokio::test]
    async fn test_redeem_keeps_tokens_from_exchange() {
        let now = Utc::now();
        let client = FakeTokenClient::returning(TokenResponse {
            id_token: Some(IdTokenBuilder::new(now).sign()),
            access_token: Some("access-123".to_string()),
            refresh_token: Some("refresh-456".to_string()),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3600),
            scope: None,
        });

        let mut credentials = OpenIdCredentials::new("code-1");
        credentials
            .redeem(&test_configuration(), &client, &context(now))
            .await
            .unwrap();

        assert!(credentials.is_redeemed());
        assert_eq!(credentials.access_token(), Some("access-123"));
        assert_eq!(credentials.refresh_token(), Some("refresh-456"));
        assert_eq!(client.last_request().unwrap().code, "code-1");
    }

    #[tokio::test]
    async fn test_rejected_token_keeps_nothing() {
        let now = Utc::now();
        let client = FakeTokenClient::returning(TokenResponse {
            id_token: Some(IdTokenBuilder::new(now).claim("aud", serde_json::json!("someone-else")).sign()),
            access_token: Some("access-123".to_string()),
            refresh_token: Some("refresh-456".to_string()),
            ..TokenResponse::default()
        });

        let mut credentials = OpenIdCredentials::new("code-1");
        let result = credentials.redeem(&test_configuration(), &client, &context(now)).await;

        assert!(matches!(result, Err(OidcError::ClaimValidation { .. })));
        assert_eq!(credentials.access_token(), None);
        assert_eq!(credentials.refresh_token(), None);

        // The code was spent on the first attempt
        let again = credentials.redeem(&test_configuration(), &client, &context(now)).await;
        assert!(matches!(again, Err(OidcError::TokenExchange(_))));
        assert_eq!(client.call_count(), 1);
    }
}
