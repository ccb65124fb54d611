//! Turning validated credentials into a principal and roles
//!
//! The principal is always the `sub` claim. Roles come from one or more
//! [`RoleSource`]s; the bundled host then checks them against a
//! [`RoleRequirement`] with [`satisfies`].

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use log::debug;

use crate::error::OidcError;
use crate::oidc::OpenIdCredentials;
use crate::session::{AuthenticatedIdentity, UserInfo};

/// Role every successfully authenticated user holds
pub const AUTHENTICATED_ROLE: &str = "authenticated";

/// Role name in constraint mappings meaning "any authenticated user"
pub const ANY_AUTHENTICATED: &str = "**";

/// What a protected resource demands of the caller's roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRequirement {
    None,
    AnyAuthenticated,
    AnyOf(BTreeSet<String>),
}

impl RoleRequirement {
    /// Interpret the role list of a constraint mapping
    #[must_use]
    pub fn from_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: BTreeSet<String> = roles.into_iter().map(Into::into).collect();
        if roles.is_empty() {
            Self::None
        } else if roles.contains(ANY_AUTHENTICATED) {
            Self::AnyAuthenticated
        } else {
            Self::AnyOf(roles)
        }
    }
}

/// Whether a role set meets a requirement
#[must_use]
pub fn satisfies(roles: &BTreeSet<String>, requirement: &RoleRequirement) -> bool {
    match requirement {
        RoleRequirement::None | RoleRequirement::AnyAuthenticated => true,
        RoleRequirement::AnyOf(required) => !roles.is_disjoint(required),
    }
}

/// Source of roles for an authenticated user
pub trait RoleSource: Send + Sync {
    /// Roles for `user`, or `None` when this source does not know the user
    fn roles_for(&self, user: &UserInfo) -> Option<BTreeSet<String>>;
}

/// Grants [`AUTHENTICATED_ROLE`] to everyone the provider vouches for
#[derive(Debug, Default, Clone, Copy)]
pub struct ImplicitRoles;

impl RoleSource for ImplicitRoles {
    fn roles_for(&self, _user: &UserInfo) -> Option<BTreeSet<String>> {
        Some(BTreeSet::from([AUTHENTICATED_ROLE.to_string()]))
    }
}

/// Locally administered roles keyed by `sub` or `email`
#[derive(Debug, Default, Clone)]
pub struct LocalRoleStore {
    entries: HashMap<String, BTreeSet<String>>,
}

impl LocalRoleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant roles to the user identified by `user` (a subject or an email address)
    pub fn insert<I, S>(&mut self, user: impl Into<String>, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .entry(user.into())
            .or_default()
            .extend(roles.into_iter().map(Into::into));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RoleSource for LocalRoleStore {
    fn roles_for(&self, user: &UserInfo) -> Option<BTreeSet<String>> {
        let by_subject = user.subject().and_then(|sub| self.entries.get(sub));
        let by_email = user.email().and_then(|email| self.entries.get(email));
        match (by_subject, by_email) {
            (None, None) => None,
            (a, b) => Some(a.into_iter().chain(b).flatten().cloned().collect()),
        }
    }
}

pub struct LoginService {
    sources: Vec<Box<dyn RoleSource>>,
    authenticate_new_users: bool,
}

impl Default for LoginService {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginService {
    /// Login service granting only the implicit role
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: vec![Box::new(ImplicitRoles)],
            authenticate_new_users: true,
        }
    }

    #[must_use]
    pub fn with_role_source(mut self, source: impl RoleSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// When `false`, users unknown to any role source are refused
    #[must_use]
    pub fn authenticate_new_users(mut self, allow: bool) -> Self {
        self.authenticate_new_users = allow;
        self
    }

    /// Build the session identity from redeemed credentials
    ///
    /// # Errors
    ///
    /// - `InvalidCallback` if the credentials were never redeemed
    /// - `UserNotPermitted` if new users are refused and a role source does not know this one
    pub fn login(
        &self,
        credentials: OpenIdCredentials,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedIdentity, OidcError> {
        let principal = credentials
            .subject()
            .ok_or_else(|| OidcError::InvalidCallback("credentials carry no subject".to_string()))?
            .to_string();
        let id_token_expires_at = credentials.expires_at();
        let (id_token, claims) = credentials.into_parts();
        let (Some(id_token), Some(claims)) = (id_token, claims) else {
            return Err(OidcError::InvalidCallback(
                "credentials were not redeemed".to_string(),
            ));
        };
        let user_info = UserInfo::new(claims);

        let mut roles = BTreeSet::new();
        for source in &self.sources {
            match source.roles_for(&user_info) {
                Some(granted) => roles.extend(granted),
                None if !self.authenticate_new_users => {
                    return Err(OidcError::UserNotPermitted(principal));
                }
                None => debug!("Role source has no entry for {principal}"),
            }
        }

        Ok(AuthenticatedIdentity {
            principal,
            roles,
            user_info,
            id_token,
            authenticated_at: now,
            id_token_expires_at,
        })
    }
}
