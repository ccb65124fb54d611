//! HTTP response handling
//!
//! Small fluent builders used by the handlers so that every redirect, error
//! and page goes through one place and carries the right cookies.

use actix_web::{cookie::Cookie, http::header, HttpResponse};
use serde_json::json;

/// Unified response builder
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Create a redirect response (302 Found) with optional cookies
    #[must_use]
    pub fn redirect(location: &str) -> RedirectBuilder {
        RedirectBuilder::new(location)
    }

    /// Authenticated but lacking the required role
    #[must_use]
    pub fn forbidden() -> HttpResponse {
        HttpResponse::Forbidden()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .json(json!({
                "error": "forbidden",
                "message": "You do not have the role required to access this resource"
            }))
    }

    /// Internal error that must not leak details to the client
    #[must_use]
    pub fn internal_server_error() -> HttpResponse {
        HttpResponse::InternalServerError()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .json(json!({
                "error": "server_error",
                "message": "An internal server error occurred"
            }))
    }

    /// HTML page
    #[must_use]
    pub fn html(body: String) -> HttpResponse {
        HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body(body)
    }
}

/// Builder for redirect responses
pub struct RedirectBuilder {
    location: String,
    cookies: Vec<Cookie<'static>>,
}

impl RedirectBuilder {
    fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            cookies: Vec::new(),
        }
    }

    /// Add a cookie to the redirect response
    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Add an optional cookie to the redirect response
    #[must_use]
    pub fn with_optional_cookie(self, cookie: Option<Cookie<'static>>) -> Self {
        match cookie {
            Some(cookie) => self.with_cookie(cookie),
            None => self,
        }
    }

    /// Build the final `HttpResponse`
    #[must_use]
    pub fn build(self) -> HttpResponse {
        let mut builder = HttpResponse::Found();
        for cookie in self.cookies {
            builder.cookie(cookie);
        }
        builder
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .append_header((header::LOCATION, self.location))
            .finish()
    }
}
