//! Identity provider configuration
//!
//! An [`OpenIdConfiguration`] is built once at startup, either from explicit
//! endpoints or by resolving the issuer's discovery document, and is shared
//! read-only by every request afterwards.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::OidcError;
use crate::utils::LoggingHelper;

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SCOPES: &[&str] = &["openid", "email", "profile"];

/// Subset of the provider metadata document this client consumes
#[derive(Debug, Clone, Deserialize)]
pub struct OidcDiscoveryDocument {
    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// Resolved identity provider and client registration
#[derive(Debug, Clone)]
pub struct OpenIdConfiguration {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    end_session_endpoint: Option<String>,
    jwks_uri: Option<String>,
    signing_algorithms: Vec<String>,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl OpenIdConfiguration {
    /// Start building a configuration for `issuer` and the registered client
    #[must_use]
    pub fn builder(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> OpenIdConfigurationBuilder {
        OpenIdConfigurationBuilder {
            issuer: issuer.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            authorization_endpoint: None,
            token_endpoint: None,
            end_session_endpoint: None,
            jwks_uri: None,
            signing_algorithms: Vec::new(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Discovery document location for an issuer; trailing slashes on the issuer are ignored
    #[must_use]
    pub fn discovery_url(issuer: &str) -> String {
        format!("{}{DISCOVERY_PATH}", issuer.trim_end_matches('/'))
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn authorization_endpoint(&self) -> &str {
        &self.authorization_endpoint
    }

    #[must_use]
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    #[must_use]
    pub fn end_session_endpoint(&self) -> Option<&str> {
        self.end_session_endpoint.as_deref()
    }

    #[must_use]
    pub fn jwks_uri(&self) -> Option<&str> {
        self.jwks_uri.as_deref()
    }

    /// ID token signing algorithms the provider advertises; empty when unknown
    #[must_use]
    pub fn signing_algorithms(&self) -> &[String] {
        &self.signing_algorithms
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Path component of the redirect URI, which is where callbacks arrive
    #[must_use]
    pub fn redirect_path(&self) -> String {
        Url::parse(&self.redirect_uri).map_or_else(|_| self.redirect_uri.clone(), |url| url.path().to_string())
    }

    /// Build the authorization request URL for a new login attempt
    ///
    /// # Errors
    ///
    /// Returns `Discovery` if the authorization endpoint is not a valid URL
    pub fn authorization_url(&self, state: &str, nonce: Option<&str>) -> Result<String, OidcError> {
        let mut url = Url::parse(&self.authorization_endpoint)
            .map_err(|e| OidcError::Discovery(format!("Invalid authorization endpoint: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("state", state);
            if let Some(nonce) = nonce {
                query.append_pair("nonce", nonce);
            }
        }
        Ok(url.to_string())
    }

    /// Build the RP-initiated logout URL, if the provider advertises one
    #[must_use]
    pub fn end_session_url(
        &self,
        id_token_hint: Option<&str>,
        post_logout_redirect_uri: Option<&str>,
    ) -> Option<String> {
        let mut url = Url::parse(self.end_session_endpoint.as_deref()?).ok()?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            if let Some(target) = post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", target);
            }
            query.append_pair("client_id", &self.client_id);
        }
        Some(url.to_string())
    }
}

/// Builder for [`OpenIdConfiguration`]
#[derive(Debug, Clone)]
pub struct OpenIdConfigurationBuilder {
    issuer: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    end_session_endpoint: Option<String>,
    jwks_uri: Option<String>,
    signing_algorithms: Vec<String>,
    scopes: Vec<String>,
    discovery_timeout: Duration,
}

impl OpenIdConfigurationBuilder {
    #[must_use]
    pub fn authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.authorization_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn end_session_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.end_session_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn jwks_uri(mut self, uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn signing_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signing_algorithms = algorithms.into_iter().map(Into::into).collect();
        self
    }

    /// Requested scopes; `openid` is always sent first
    #[must_use]
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut requested = vec!["openid".to_string()];
        for scope in scopes {
            let scope = scope.into();
            if !scope.is_empty() && !requested.contains(&scope) {
                requested.push(scope);
            }
        }
        self.scopes = requested;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Build from explicitly configured endpoints without any network access
    ///
    /// # Errors
    ///
    /// Returns `Discovery` if the issuer, client id, or either required
    /// endpoint is missing, or if any configured URL does not parse
    pub fn build(self) -> Result<OpenIdConfiguration, OidcError> {
        if self.issuer.trim().is_empty() {
            return Err(OidcError::Discovery("issuer is not configured".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(OidcError::Discovery("client_id is not configured".to_string()));
        }

        let authorization_endpoint = self
            .authorization_endpoint
            .ok_or_else(|| OidcError::Discovery("missing authorization_endpoint".to_string()))?;
        let token_endpoint = self
            .token_endpoint
            .ok_or_else(|| OidcError::Discovery("missing token_endpoint".to_string()))?;

        for (name, value) in [
            ("authorization_endpoint", Some(authorization_endpoint.as_str())),
            ("token_endpoint", Some(token_endpoint.as_str())),
            ("end_session_endpoint", self.end_session_endpoint.as_deref()),
            ("jwks_uri", self.jwks_uri.as_deref()),
            ("redirect_uri", Some(self.redirect_uri.as_str())),
        ] {
            if let Some(value) = value {
                Url::parse(value)
                    .map_err(|e| OidcError::Discovery(format!("Invalid {name} '{value}': {e}")))?;
            }
        }

        LoggingHelper::log_provider_configured(&self.issuer, &authorization_endpoint, &token_endpoint);

        Ok(OpenIdConfiguration {
            issuer: self.issuer,
            authorization_endpoint,
            token_endpoint,
            end_session_endpoint: self.end_session_endpoint,
            jwks_uri: self.jwks_uri,
            signing_algorithms: self.signing_algorithms,
            client_id: self.client_id,
            client_secret: self.client_secret,
            redirect_uri: self.redirect_uri,
            scopes: self.scopes,
        })
    }

    /// Build the configuration, fetching the discovery document when the
    /// authorization or token endpoint was not set explicitly
    ///
    /// Explicitly configured endpoints win over discovered ones.
    ///
    /// # Errors
    ///
    /// Returns `Discovery` if the document is unreachable, times out, is not
    /// valid JSON, names a different issuer, or lacks a required endpoint
    pub async fn resolve(mut self) -> Result<OpenIdConfiguration, OidcError> {
        if self.authorization_endpoint.is_some() && self.token_endpoint.is_some() {
            return self.build();
        }

        let discovery_url = OpenIdConfiguration::discovery_url(&self.issuer);
        let document = fetch_discovery_document(&discovery_url, self.discovery_timeout).await?;

        if let Some(advertised) = document.issuer.as_deref() {
            if advertised.trim_end_matches('/') != self.issuer.trim_end_matches('/') {
                return Err(OidcError::Discovery(format!(
                    "issuer mismatch: configured '{}', discovery document names '{advertised}'",
                    self.issuer
                )));
            }
            // Tokens carry the advertised form and iss is compared exactly
            self.issuer = advertised.to_string();
        }

        self.authorization_endpoint = self.authorization_endpoint.or(document.authorization_endpoint);
        self.token_endpoint = self.token_endpoint.or(document.token_endpoint);
        self.end_session_endpoint = self.end_session_endpoint.or(document.end_session_endpoint);
        self.jwks_uri = self.jwks_uri.or(document.jwks_uri);
        if self.signing_algorithms.is_empty() {
            self.signing_algorithms = document.id_token_signing_alg_values_supported;
        }
        self.build()
    }
}

/// Fetch and parse a discovery document
///
/// # Errors
///
/// Returns `Discovery` on transport failure, timeout, non-success status, or invalid JSON
pub async fn fetch_discovery_document(
    discovery_url: &str,
    timeout: Duration,
) -> Result<OidcDiscoveryDocument, OidcError> {
    LoggingHelper::log_discovery_start(discovery_url);

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| OidcError::Discovery(format!("Failed to build HTTP client: {e}")))?;

    let response = client
        .get(discovery_url)
        .send()
        .await
        .map_err(|e| OidcError::Discovery(format!("Failed to fetch discovery document: {e}")))?;

    if !response.status().is_success() {
        return Err(OidcError::Discovery(format!(
            "Discovery document request failed with status: {}",
            response.status()
        )));
    }

    let document: OidcDiscoveryDocument = response.json().await.map_err(|e| {
        OidcError::Discovery(format!("Failed to parse discovery document JSON: {e}"))
    })?;

    log::debug!(
        "Discovery document fetched, jwks_uri: {:?}, end_session_endpoint: {:?}",
        document.jwks_uri,
        document.end_session_endpoint
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit() -> OpenIdConfigurationBuilder {
        OpenIdConfiguration::builder(
            "https://idp.example.com",
            "client-1",
            "secret-1",
            "https://app.example.com/j_security_check",
        )
        .authorization_endpoint("https://idp.example.com/auth")
        .token_endpoint("https://idp.example.com/token")
    }

    #[test]
    fn test_build_with_explicit_endpoints() {
        let config = explicit().build().unwrap();
        assert_eq!(config.issuer(), "https://idp.example.com");
        assert_eq!(config.token_endpoint(), "https://idp.example.com/token");
        assert_eq!(config.end_session_endpoint(), None);
        assert_eq!(config.redirect_path(), "/j_security_check");
        assert_eq!(config.scopes(), ["openid", "email", "profile"]);
    }

    #[test]
    fn test_build_without_endpoints_fails() {
        let result = OpenIdConfiguration::builder("https://idp.example.com", "c", "s", "https://app/cb").build();
        assert!(matches!(result, Err(OidcError::Discovery(_))));
    }

    #[test]
    fn test_build_rejects_invalid_urls() {
        let result = explicit().end_session_endpoint("not a url").build();
        assert!(matches!(result, Err(OidcError::Discovery(_))));
    }

    #[test]
    fn test_discovery_url_strips_trailing_slash() {
        assert_eq!(
            OpenIdConfiguration::discovery_url("https://idp.example.com/"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            OpenIdConfiguration::discovery_url("https://idp.example.com/realms/demo"),
            "https://idp.example.com/realms/demo/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_scopes_always_start_with_openid() {
        let config = explicit().scopes(["email", "openid", "groups"]).build().unwrap();
        assert_eq!(config.scopes(), ["openid", "email", "groups"]);
    }

    #[test]
    fn test_authorization_url_parameters() {
        let config = explicit().build().unwrap();
        let url = Url::parse(&config.authorization_url("st", Some("nn")).unwrap()).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "https://app.example.com/j_security_check");
        assert_eq!(params["scope"], "openid email profile");
        assert_eq!(params["state"], "st");
        assert_eq!(params["nonce"], "nn");

        let url = config.authorization_url("st", None).unwrap();
        assert!(!url.contains("nonce="));
    }

    #[test]
    fn test_end_session_url() {
        let config = explicit().build().unwrap();
        assert_eq!(config.end_session_url(Some("tok"), None), None);

        let config = explicit()
            .end_session_endpoint("https://idp.example.com/logout")
            .build()
            .unwrap();
        let url = Url::parse(
            &config
                .end_session_url(Some("tok"), Some("https://app.example.com/"))
                .unwrap(),
        )
        .unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["id_token_hint"], "tok");
        assert_eq!(params["post_logout_redirect_uri"], "https://app.example.com/");
        assert_eq!(params["client_id"], "client-1");
    }

    #[tokio::test]
    async fn test_resolve_with_explicit_endpoints_skips_network() {
        // Unroutable issuer: any discovery attempt would fail
        let config = OpenIdConfiguration::builder("http://127.0.0.1:1", "c", "s", "http://localhost/cb")
            .authorization_endpoint("http://127.0.0.1:1/auth")
            .token_endpoint("http://127.0.0.1:1/token")
            .resolve()
            .await
            .unwrap();
        assert_eq!(config.authorization_endpoint(), "http://127.0.0.1:1/auth");
    }
}
