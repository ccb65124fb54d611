use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::authenticator::AuthenticatorOptions;
use crate::constraints::ConstraintSet;
use crate::login_service::{LocalRoleStore, LoginService};
use crate::oidc::configuration::DEFAULT_SCOPES;
use crate::oidc::{OpenIdConfiguration, OpenIdConfigurationBuilder};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OidcSettings {
    pub application: ApplicationSettings,
    pub provider: ProviderSettings,
    pub authenticator: AuthenticatorSettings,
    pub signature: SignatureSettings,
    pub session: SessionSettings,
    pub cookies: CookieSettings,
    pub logging: LoggingSettings,
    pub roles: RoleSettings,
    pub constraints: Vec<ConstraintSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub issuer: String,
    pub redirect_uri: String,

    // Explicit endpoints skip discovery
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    // Empty means whatever discovery advertises
    pub signing_algorithms: Vec<String>,
    pub scopes: Vec<String>,

    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,

    pub discovery_timeout_seconds: u64,
    pub token_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorSettings {
    pub landing_page: String,
    pub error_page: String,
    pub logout_redirect: String,
    pub post_logout_redirect_uri: Option<String>,
    pub use_nonce: bool,
    /// Clock skew tolerance in seconds (default: 300 = 5 minutes)
    pub clock_skew_seconds: u64,
    /// How long a login attempt may wait for its callback (default: 600)
    pub pending_login_ttl_seconds: u64,
    pub logout_when_id_token_expires: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureSettings {
    /// Verify ID token signatures (off by default)
    pub verify_signatures: bool,
    /// JWKS cache duration in seconds (default: 3600 = 1 hour)
    pub jwks_cache_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Server-side session lifetime; also the session cookie's max age
    pub session_expiration_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSettings {
    /// Admit users that have no entry in `users`
    pub authenticate_new_users: bool,
    pub users: Vec<UserRoleSettings>,
}

/// Locally administered roles for one user, keyed by `sub` or email
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleSettings {
    pub user: String,
    pub roles: Vec<String>,
}

/// Path spec protected by a set of roles (`**` = any authenticated user)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSettings {
    pub path: String,
    pub roles: Vec<String>,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            redirect_uri: "http://localhost:8080/j_security_check".to_string(),
            authorization_endpoint: None,
            token_endpoint: None,
            end_session_endpoint: None,
            jwks_uri: None,
            signing_algorithms: Vec::new(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
            discovery_timeout_seconds: 10,
            token_timeout_seconds: 5,
        }
    }
}

impl Default for AuthenticatorSettings {
    fn default() -> Self {
        Self {
            landing_page: "/".to_string(),
            error_page: "/error".to_string(),
            logout_redirect: "/".to_string(),
            post_logout_redirect_uri: None,
            use_nonce: true,
            clock_skew_seconds: 300,
            pending_login_ttl_seconds: 600,
            logout_when_id_token_expires: false,
        }
    }
}

impl Default for SignatureSettings {
    fn default() -> Self {
        Self {
            verify_signatures: false,
            jwks_cache_seconds: 3600,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_expiration_hours: 8,
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: true, // Default to secure cookies
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for RoleSettings {
    fn default() -> Self {
        Self {
            authenticate_new_users: true,
            users: Vec::new(),
        }
    }
}

impl OidcSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();

        let secrets_dir = std::env::var("OIDC_SECRETS_DIR").ok();
        let mut settings = Self::load_base_settings(Path::new("."), secrets_dir.as_deref().map(Path::new))?;
        Self::apply_env_overrides(&mut settings);
        Self::initialize_logging(&settings.logging.level);

        if settings.constraints.is_empty() {
            settings.constraints = Self::default_constraints();
        }
        Ok(settings)
    }

    /// Initialize logging; `RUST_LOG` wins over the configured level
    fn initialize_logging(level: &str) {
        let env = env_logger::Env::default().default_filter_or(level);
        if env_logger::Builder::from_env(env).try_init().is_err() {
            debug!("Logger already initialized");
        }
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `OIDC_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in the working directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    pub fn load_base_settings(
        working_dir: &Path,
        secrets_dir: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = working_dir.join("Settings.toml");
        if default_config_path.exists() {
            let toml_content = fs::read_to_string(&default_config_path)?;
            settings = basic_toml::from_str(&toml_content)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Some(secrets_dir) = secrets_dir {
            let secrets_path = secrets_dir.join("Settings.toml");
            if secrets_path.exists() {
                let secrets_toml_content = fs::read_to_string(&secrets_path)?;
                settings = basic_toml::from_str(&secrets_toml_content)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ OIDC_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        if let Ok(host) = std::env::var("HOST") {
            settings.application.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                settings.application.port = port;
            }
        }

        if let Ok(issuer) = std::env::var("OIDC_ISSUER") {
            settings.provider.issuer = issuer;
        }
        if let Ok(client_id) = std::env::var("OIDC_CLIENT_ID") {
            settings.provider.client_id = Some(client_id);
        }
        if let Ok(client_secret) = std::env::var("OIDC_CLIENT_SECRET") {
            settings.provider.client_secret = Some(client_secret);
        }
        if let Ok(redirect_uri) = std::env::var("OIDC_REDIRECT_URI") {
            settings.provider.redirect_uri = redirect_uri;
        }

        Self::apply_numeric_env_override(
            "SESSION_EXPIRATION_HOURS",
            &mut settings.session.session_expiration_hours,
        );

        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                settings.cookies.secure = cookie_secure;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            settings.logging.level = log_level;
        }
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Pages of the bundled demo host
    fn default_constraints() -> Vec<ConstraintSettings> {
        [("/profile", "**"), ("/login", "**"), ("/admin", "admin")]
            .into_iter()
            .map(|(path, role)| ConstraintSettings {
                path: path.to_string(),
                roles: vec![role.to_string()],
            })
            .collect()
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Provider configuration builder populated from these settings
    #[must_use]
    pub fn configuration_builder(&self) -> OpenIdConfigurationBuilder {
        let provider = &self.provider;
        let mut builder = OpenIdConfiguration::builder(
            provider.issuer.clone(),
            provider.get_client_id().unwrap_or_default(),
            provider.get_client_secret().unwrap_or_default(),
            provider.redirect_uri.clone(),
        )
        .scopes(provider.scopes.clone())
        .discovery_timeout(Duration::from_secs(provider.discovery_timeout_seconds));

        if let Some(endpoint) = &provider.authorization_endpoint {
            builder = builder.authorization_endpoint(endpoint.clone());
        }
        if let Some(endpoint) = &provider.token_endpoint {
            builder = builder.token_endpoint(endpoint.clone());
        }
        if let Some(endpoint) = &provider.end_session_endpoint {
            builder = builder.end_session_endpoint(endpoint.clone());
        }
        if let Some(uri) = &provider.jwks_uri {
            builder = builder.jwks_uri(uri.clone());
        }
        if !provider.signing_algorithms.is_empty() {
            builder = builder.signing_algorithms(provider.signing_algorithms.clone());
        }
        builder
    }

    #[must_use]
    pub fn authenticator_options(&self) -> AuthenticatorOptions {
        let auth = &self.authenticator;
        AuthenticatorOptions {
            landing_page: auth.landing_page.clone(),
            error_page: auth.error_page.clone(),
            logout_redirect: auth.logout_redirect.clone(),
            post_logout_redirect_uri: auth.post_logout_redirect_uri.clone(),
            use_nonce: auth.use_nonce,
            clock_skew: seconds(auth.clock_skew_seconds),
            pending_login_ttl: seconds(auth.pending_login_ttl_seconds),
            logout_when_id_token_expires: auth.logout_when_id_token_expires,
        }
    }

    #[must_use]
    pub fn login_service(&self) -> LoginService {
        let mut service = LoginService::new().authenticate_new_users(self.roles.authenticate_new_users);
        if !self.roles.users.is_empty() {
            let mut store = LocalRoleStore::new();
            for entry in &self.roles.users {
                store.insert(entry.user.clone(), entry.roles.iter().cloned());
            }
            service = service.with_role_source(store);
        }
        service
    }

    #[must_use]
    pub fn constraint_set(&self) -> ConstraintSet {
        let mut set = ConstraintSet::new();
        for constraint in &self.constraints {
            set.add(constraint.path.clone(), constraint.roles.iter().cloned());
        }
        set
    }

    #[must_use]
    pub fn session_max_age(&self) -> chrono::Duration {
        seconds(self.session.session_expiration_hours.saturating_mul(3600))
    }
}

fn seconds(value: u64) -> chrono::Duration {
    // chrono caps durations at i64::MAX milliseconds
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

impl ProviderSettings {
    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        if let Some(env_var) = &self.client_id_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.client_id.clone()
    }

    /// Get the client secret, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        if let Some(env_var) = &self.client_secret_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.client_secret.clone()
    }
}
