// Demo pages served behind the authenticator
use actix_web::{web, HttpResponse, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AppState;
use crate::session::AuthenticatedIdentity;
use crate::utils::ResponseBuilder;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

/// Health check endpoint
///
/// # Errors
/// Never fails
pub async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        message: "OIDC gate is running",
    }))
}

#[derive(Debug, Deserialize)]
pub struct ErrorQuery {
    pub error: Option<String>,
}

/// Login failure page; the authenticator appends `?error=<code>`
///
/// # Errors
/// Never fails
pub async fn error_page(query: web::Query<ErrorQuery>) -> Result<HttpResponse> {
    let code = query.error.as_deref().unwrap_or("unknown");
    let body = format!(
        "<h1>Login failed</h1><p>{}</p><p><code>{}</code></p><p><a href=\"/login\">Try again</a></p>",
        describe_error(code),
        escape_html(code)
    );
    Ok(ResponseBuilder::html(layout("Login failed", &body)))
}

fn describe_error(code: &str) -> &'static str {
    match code {
        "state_mismatch" => "The login request expired or was not started from this browser.",
        "idp_error" => "The identity provider refused the login.",
        "token_exchange_failed" => "The identity provider could not be reached to complete the login.",
        "invalid_claims" | "invalid_signature" | "malformed_token" => {
            "The identity provider returned a token this application cannot accept."
        }
        "user_not_permitted" => "Your account is not allowed to use this application.",
        "session_error" => "Your session ended while the login was in progress.",
        _ => "The login could not be completed.",
    }
}

/// Render the page for `path`, already cleared by the constraint check
#[must_use]
pub fn render(path: &str, identity: Option<&AuthenticatedIdentity>, state: &AppState) -> HttpResponse {
    match (path, identity) {
        ("/", identity) => ResponseBuilder::html(layout("Home", &home(identity))),
        ("/login", _) => ResponseBuilder::redirect(&state.authenticator.options().landing_page).build(),
        ("/profile", Some(identity)) => ResponseBuilder::html(layout("Profile", &profile(identity))),
        ("/admin", Some(identity)) => ResponseBuilder::html(layout(
            "Administration",
            &format!(
                "<h1>Administration</h1><p>Signed in as {} with roles {}</p>",
                escape_html(identity.display_name()),
                escape_html(&roles(identity))
            ),
        )),
        _ => HttpResponse::NotFound()
            .content_type("text/html; charset=utf-8")
            .body(layout("Not found", "<h1>Not found</h1>")),
    }
}

fn home(identity: Option<&AuthenticatedIdentity>) -> String {
    match identity {
        Some(identity) => format!(
            "<h1>Welcome, {}</h1><p><a href=\"/profile\">Profile</a> | <a href=\"/logout\">Log out</a></p>",
            escape_html(identity.display_name())
        ),
        None => "<h1>Welcome</h1><p><a href=\"/login\">Log in</a></p>".to_string(),
    }
}

fn profile(identity: &AuthenticatedIdentity) -> String {
    let rows: String = identity
        .user_info
        .claims()
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!(
                "<tr><th>{}</th><td>{}</td></tr>",
                escape_html(name),
                escape_html(&value)
            )
        })
        .collect();
    format!(
        "<h1>{}</h1><p>Principal: <code>{}</code></p><p>Roles: {}</p><table>{rows}</table><p><a href=\"/logout\">Log out</a></p>",
        escape_html(identity.display_name()),
        escape_html(&identity.principal),
        escape_html(&roles(identity))
    )
}

fn roles(identity: &AuthenticatedIdentity) -> String {
    identity.roles.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head><body>{body}</body></html>",
        escape_html(title)
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
