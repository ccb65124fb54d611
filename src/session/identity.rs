use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::oidc::Claims;

/// Claims about the end user as asserted by the identity provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserInfo {
    claims: Claims,
}

impl UserInfo {
    #[must_use]
    pub fn new(claims: Claims) -> Self {
        Self { claims }
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.string_claim("sub")
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.string_claim("email")
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.string_claim("name")
    }

    #[must_use]
    pub fn preferred_username(&self) -> Option<&str> {
        self.string_claim("preferred_username")
    }

    #[must_use]
    pub fn picture(&self) -> Option<&str> {
        self.string_claim("picture")
    }

    /// Any claim by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    fn string_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

/// The outcome of a completed login, bound to one session
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedIdentity {
    /// Stable identifier of the user, the `sub` claim
    pub principal: String,
    pub roles: BTreeSet<String>,
    pub user_info: UserInfo,
    #[serde(skip)]
    pub id_token: String,
    pub authenticated_at: DateTime<Utc>,
    /// `exp` of the ID token this identity was established from
    pub id_token_expires_at: Option<DateTime<Utc>>,
}

impl AuthenticatedIdentity {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Best human-readable label for pages and logs
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.user_info
            .name()
            .or_else(|| self.user_info.preferred_username())
            .or_else(|| self.user_info.email())
            .unwrap_or(&self.principal)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.id_token_expires_at.is_some_and(|exp| now >= exp)
    }
}
