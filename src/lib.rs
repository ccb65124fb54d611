#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the oidc-gate crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod authenticator;
pub mod constraints;
pub mod error;
pub mod handlers;
pub mod login_service;
pub mod oidc;
pub mod session;
pub mod settings;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use authenticator::{AuthOutcome, AuthState, AuthenticatorOptions, CallbackParams, OpenIdAuthenticator};
pub use constraints::ConstraintSet;
pub use error::OidcError;
pub use login_service::{satisfies, LoginService, RoleRequirement};
pub use oidc::{OpenIdConfiguration, OpenIdCredentials};
pub use session::{AuthenticatedIdentity, InMemorySessionStore, SessionStore};
pub use settings::OidcSettings;
