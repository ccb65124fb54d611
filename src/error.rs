//! Error taxonomy for the OpenID Connect login flow
//!
//! Every failure a login attempt can hit maps onto one [`OidcError`] variant.
//! Discovery failures are fatal at startup; everything else is scoped to a
//! single attempt and ends with a redirect to the error page.

use thiserror::Error;

/// Errors produced while configuring or running the OIDC authorization-code flow
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OidcError {
    /// Identity provider metadata was unreachable or incomplete
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// The server-to-server code exchange failed (transport, status, or body)
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// The ID token is not a structurally valid compact JWT
    #[error("Malformed ID token: {0}")]
    MalformedToken(String),

    /// A claim in the ID token did not match what this client expects
    #[error("Claim '{claim}' validation failed: {reason}")]
    ClaimValidation { claim: String, reason: String },

    /// The ID token signature could not be verified
    #[error("ID token signature invalid: {0}")]
    InvalidSignature(String),

    /// The callback `state` did not match a pending login attempt
    #[error("OAuth state mismatch: {0}")]
    StateMismatch(String),

    /// The identity provider answered the authorization request with an error
    #[error("Identity provider returned error '{error}': {description}")]
    IdentityProvider { error: String, description: String },

    /// The callback request was missing required parameters
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// The local role store refused an otherwise valid identity
    #[error("User '{0}' is not permitted to log in")]
    UserNotPermitted(String),

    /// The session store could not satisfy the request
    #[error("Session error: {0}")]
    Session(String),
}

impl OidcError {
    /// Build a claim validation error
    #[must_use]
    pub fn claim(claim: &str, reason: impl Into<String>) -> Self {
        Self::ClaimValidation {
            claim: claim.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable code used in the error page query string
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::TokenExchange(_) => "token_exchange_failed",
            Self::MalformedToken(_) => "malformed_token",
            Self::ClaimValidation { .. } => "invalid_claims",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::StateMismatch(_) => "state_mismatch",
            Self::IdentityProvider { .. } => "idp_error",
            Self::InvalidCallback(_) => "invalid_callback",
            Self::UserNotPermitted(_) => "user_not_permitted",
            Self::Session(_) => "session_error",
        }
    }

    /// Whether the failure may indicate a forged or replayed request rather
    /// than an infrastructure problem
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::ClaimValidation { .. }
                | Self::InvalidSignature(_)
                | Self::StateMismatch(_)
                | Self::MalformedToken(_)
        )
    }
}
