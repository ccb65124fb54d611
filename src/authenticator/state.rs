use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::OidcError;
use crate::session::AuthenticatedIdentity;

/// Where a request stands in the authorization-code flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AuthRequested,
    CallbackReceived,
    Authenticated,
    Error,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::AuthRequested => "auth_requested",
            Self::CallbackReceived => "callback_received",
            Self::Authenticated => "authenticated",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Query (or form) parameters of a redirect back from the identity provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Decision returned to the host for one request
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// The session carries an identity; `redirect` is set when a login just completed
    Authenticated {
        session_id: String,
        identity: Arc<AuthenticatedIdentity>,
        redirect: Option<String>,
    },
    /// Send the browser to the identity provider
    Challenge { session_id: String, location: String },
    /// The login attempt failed; send the browser to the error page
    Failed { error: OidcError, location: String },
    /// The session is gone; send the browser to `location`
    LoggedOut { location: String },
}

impl AuthOutcome {
    #[must_use]
    pub fn state(&self) -> AuthState {
        match self {
            Self::Authenticated { .. } => AuthState::Authenticated,
            Self::Challenge { .. } => AuthState::AuthRequested,
            Self::Failed { .. } => AuthState::Error,
            Self::LoggedOut { .. } => AuthState::Unauthenticated,
        }
    }

    /// Redirect target, if the outcome calls for one
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Authenticated { redirect, .. } => redirect.as_deref(),
            Self::Challenge { location, .. }
            | Self::Failed { location, .. }
            | Self::LoggedOut { location } => Some(location),
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&OidcError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}
