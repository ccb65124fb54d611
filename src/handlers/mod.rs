//! actix-web host around the framework-neutral authenticator
//!
//! The handlers only translate between HTTP and [`AuthOutcome`]: they read
//! the session cookie, call into [`OpenIdAuthenticator`], and turn the
//! outcome into a redirect, a page, or a 403.

pub mod auth;
pub mod pages;
pub mod secured;

use std::sync::Arc;

use actix_web::{web, HttpResponse};

use crate::authenticator::{AuthOutcome, OpenIdAuthenticator};
use crate::constraints::ConstraintSet;
use crate::session::CookieFactory;
use crate::utils::ResponseBuilder;

pub use auth::{callback, logout};
pub use pages::{error_page, health};
pub use secured::secured_page;

/// Shared state handed to every handler
pub struct AppState {
    pub authenticator: Arc<OpenIdAuthenticator>,
    pub constraints: ConstraintSet,
    pub cookies: CookieFactory,
}

impl AppState {
    #[must_use]
    pub fn new(authenticator: Arc<OpenIdAuthenticator>, constraints: ConstraintSet, cookies: CookieFactory) -> Self {
        Self {
            authenticator,
            constraints,
            cookies,
        }
    }

    /// Redirect for an outcome that sends the browser elsewhere
    ///
    /// Challenges and completed logins bind the browser to the session they
    /// name; logouts make it forget its session id.
    #[must_use]
    pub fn redirect_for(&self, outcome: &AuthOutcome) -> Option<HttpResponse> {
        let location = outcome.location()?;
        let cookie = match outcome {
            AuthOutcome::Challenge { session_id, .. } | AuthOutcome::Authenticated { session_id, .. } => {
                Some(self.cookies.create_session_cookie(session_id))
            }
            AuthOutcome::LoggedOut { .. } => Some(self.cookies.create_expired_cookie()),
            AuthOutcome::Failed { .. } => None,
        };
        Some(
            ResponseBuilder::redirect(location)
                .with_optional_cookie(cookie)
                .build(),
        )
    }
}

/// Register the host's routes; the callback lives at the redirect URI's path
pub fn configure(cfg: &mut web::ServiceConfig, callback_path: &str) {
    cfg.route("/health", web::get().to(health))
        .service(
            web::resource(callback_path)
                .route(web::get().to(callback))
                .route(web::post().to(callback)),
        )
        .route("/logout", web::get().to(logout))
        .route("/logout", web::post().to(logout))
        .route("/error", web::get().to(error_page))
        .default_service(web::route().to(secured_page));
}
