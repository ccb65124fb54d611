// Centralized logging utilities to reduce verbose logging patterns
use crate::error::OidcError;
use log::{debug, error, info, warn};

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log configured provider endpoints at startup
    pub fn log_provider_configured(issuer: &str, authorization_endpoint: &str, token_endpoint: &str) {
        info!("✅ OpenID provider configured: issuer={issuer}");
        debug!("Authorization endpoint: {authorization_endpoint}");
        debug!("Token endpoint: {token_endpoint}");
    }

    /// Log discovery document fetch
    pub fn log_discovery_start(discovery_url: &str) {
        info!("🔍 Fetching OpenID discovery document from {discovery_url}");
    }

    /// Log that an authorization redirect was issued
    pub fn log_challenge_issued(original_uri: &str, uses_nonce: bool) {
        info!("🔐 Redirecting unauthenticated request for {original_uri} to identity provider (nonce: {uses_nonce})");
    }

    /// Log token exchange start
    pub fn log_token_exchange_start(token_endpoint: &str) {
        info!("🔄 Exchanging authorization code for tokens at {token_endpoint}");
    }

    /// Log token exchange summary without leaking token material
    pub fn log_token_exchange_summary(
        id_token_len: usize,
        access_token: bool,
        refresh_token: bool,
        token_type: Option<&str>,
    ) {
        debug!(
            "🔍 Token exchange summary: id_token={id_token_len} chars, access_token={}, refresh_token={}, token_type={token_type:?}",
            if access_token { "present" } else { "missing" },
            if refresh_token { "present" } else { "missing" },
        );
    }

    /// Log a completed login
    pub fn log_login_success(principal: &str, roles: &std::collections::BTreeSet<String>) {
        info!("Successfully authenticated principal {principal} with roles {roles:?}");
    }

    /// Log a failed login attempt; forgery indicators are logged apart from transport failures
    pub fn log_login_failure(err: &OidcError) {
        if err.is_security_event() {
            warn!("🚨 Rejected login attempt ({}): {err}", err.error_code());
        } else {
            error!("Login attempt failed ({}): {err}", err.error_code());
        }
    }

    /// Log logout
    pub fn log_logout(principal: Option<&str>, end_session: bool) {
        info!(
            "User {} signed out (identity provider logout: {end_session})",
            principal.unwrap_or("<anonymous>")
        );
    }
}
