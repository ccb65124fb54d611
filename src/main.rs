#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{anyhow, Context};
use oidc_gate::{
    authenticator::OpenIdAuthenticator,
    handlers::{configure, AppState},
    oidc::{HttpTokenClient, SignatureVerifier},
    session::{CookieFactory, InMemorySessionStore},
    settings::OidcSettings,
    utils::{Clock, SystemClock},
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = OidcSettings::load().map_err(|e| anyhow!("Failed to load settings: {e}"))?;

    // Discovery failures are fatal at startup
    let configuration = Arc::new(
        settings
            .configuration_builder()
            .resolve()
            .await
            .context("Failed to configure OpenID provider")?,
    );

    let token_client = HttpTokenClient::new(Duration::from_secs(settings.provider.token_timeout_seconds))
        .context("Failed to create token endpoint client")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = Arc::new(InMemorySessionStore::new(settings.session_max_age(), clock.clone()));

    let mut authenticator = OpenIdAuthenticator::new(configuration.clone(), Arc::new(token_client), sessions)
        .with_login_service(settings.login_service())
        .with_options(settings.authenticator_options());
    if settings.signature.verify_signatures {
        let verifier = SignatureVerifier::new(
            &configuration,
            Duration::from_secs(settings.signature.jwks_cache_seconds),
            Duration::from_secs(settings.provider.discovery_timeout_seconds),
            clock,
        )
        .context("Failed to create signature verifier")?;
        authenticator = authenticator.with_signature_verifier(verifier);
    }

    let state = web::Data::new(AppState::new(
        Arc::new(authenticator),
        settings.constraint_set(),
        CookieFactory::new(settings.cookies.secure, settings.session.session_expiration_hours),
    ));

    start_server(state, &settings, configuration.redirect_path()).await
}

/// Start the HTTP host
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(state: web::Data<AppState>, settings: &OidcSettings, callback_path: String) -> anyhow::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &callback_path, settings);

    HttpServer::new(move || {
        let callback_path = callback_path.clone();
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(move |cfg| configure(cfg, &callback_path))
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run()
    .await?;
    Ok(())
}

fn print_startup_info(bind_address: &str, callback_path: &str, settings: &OidcSettings) {
    println!("Starting OIDC gate on http://{bind_address}");
    println!("Identity provider: {}", settings.provider.issuer);
    println!(
        "Signature verification: {}",
        if settings.signature.verify_signatures { "enabled" } else { "disabled" }
    );
    println!();
    println!("Authentication endpoints:");
    println!("  GET|POST {callback_path} - Identity provider callback");
    println!("  GET|POST /logout - End session");
    println!("  GET  /error - Login failure page");
    println!();
    println!("Protected paths:");
    for constraint in &settings.constraints {
        println!("  {} - roles {:?}", constraint.path, constraint.roles);
    }
    println!();
    println!("System endpoints:");
    println!("  GET  /health - Health check");
}
