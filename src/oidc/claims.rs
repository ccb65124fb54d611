//! ID token claim validation
//!
//! [`validate`] is a pure function of the claims, what this client expects,
//! and the validation instant. It never touches the network or the clock.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::error::OidcError;
use crate::oidc::jwt::Claims;
use crate::utils::crypto::constant_time_eq;

pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 300;

/// What a freshly issued ID token must assert for this client
#[derive(Debug, Clone)]
pub struct ClaimExpectations<'a> {
    pub issuer: &'a str,
    pub client_id: &'a str,
    /// Nonce sent with the authorization request, if any
    pub nonce: Option<&'a str>,
    pub clock_skew: Duration,
}

impl<'a> ClaimExpectations<'a> {
    #[must_use]
    pub fn new(issuer: &'a str, client_id: &'a str) -> Self {
        Self {
            issuer,
            client_id,
            nonce: None,
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS),
        }
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<&'a str>) -> Self {
        self.nonce = nonce;
        self
    }

    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }
}

/// Validate ID token claims at instant `now`
///
/// # Errors
///
/// Returns `ClaimValidation` naming the first claim that fails:
/// - `iss` differs from the configured issuer
/// - `aud` neither equals nor contains the client id
/// - `azp` is missing with several audiences, or names another client
/// - `exp` is missing or `now` is past `exp` plus the allowed skew
/// - `nbf` is later than `now` plus the allowed skew
/// - `nonce` differs from the one sent with the authorization request
/// - `sub` is missing or empty
pub fn validate(
    claims: &Claims,
    expected: &ClaimExpectations<'_>,
    now: DateTime<Utc>,
) -> Result<(), OidcError> {
    validate_issuer(claims, expected.issuer)?;
    validate_audience(claims, expected.client_id)?;
    validate_time_claims(claims, now, expected.clock_skew)?;
    if let Some(nonce) = expected.nonce {
        validate_nonce(claims, nonce)?;
    }
    validate_subject(claims)
}

fn validate_issuer(claims: &Claims, issuer: &str) -> Result<(), OidcError> {
    match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if iss == issuer => Ok(()),
        Some(iss) => Err(OidcError::claim(
            "iss",
            format!("expected '{issuer}', got '{iss}'"),
        )),
        None => Err(OidcError::claim("iss", "missing")),
    }
}

fn validate_audience(claims: &Claims, client_id: &str) -> Result<(), OidcError> {
    let audiences: Vec<&str> = match claims.get("aud") {
        Some(Value::String(aud)) => vec![aud.as_str()],
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
        Some(_) => return Err(OidcError::claim("aud", "must be a string or array of strings")),
        None => return Err(OidcError::claim("aud", "missing")),
    };

    if !audiences.contains(&client_id) {
        return Err(OidcError::claim(
            "aud",
            format!("'{client_id}' is not among {audiences:?}"),
        ));
    }

    match claims.get("azp").and_then(Value::as_str) {
        Some(azp) if azp != client_id => Err(OidcError::claim(
            "azp",
            format!("expected '{client_id}', got '{azp}'"),
        )),
        None if audiences.len() > 1 => Err(OidcError::claim(
            "azp",
            "required when the token has several audiences",
        )),
        _ => Ok(()),
    }
}

fn validate_time_claims(claims: &Claims, now: DateTime<Utc>, skew: Duration) -> Result<(), OidcError> {
    let exp = numeric_date(claims, "exp")?.ok_or_else(|| OidcError::claim("exp", "missing"))?;
    if now >= exp + skew {
        return Err(OidcError::claim(
            "exp",
            format!("token expired at {}", exp.to_rfc3339()),
        ));
    }

    if let Some(nbf) = numeric_date(claims, "nbf")? {
        if now + skew < nbf {
            return Err(OidcError::claim(
                "nbf",
                format!("token not valid before {}", nbf.to_rfc3339()),
            ));
        }
    }

    Ok(())
}

fn validate_nonce(claims: &Claims, nonce: &str) -> Result<(), OidcError> {
    match claims.get("nonce").and_then(Value::as_str) {
        Some(actual) if constant_time_eq(actual, nonce) => Ok(()),
        Some(_) => Err(OidcError::claim("nonce", "does not match the authorization request")),
        None => Err(OidcError::claim("nonce", "missing")),
    }
}

fn validate_subject(claims: &Claims) -> Result<(), OidcError> {
    match claims.get("sub").and_then(Value::as_str) {
        Some(sub) if !sub.is_empty() => Ok(()),
        _ => Err(OidcError::claim("sub", "missing")),
    }
}

/// Read a NumericDate claim; fractional seconds are truncated
fn numeric_date(claims: &Claims, name: &str) -> Result<Option<DateTime<Utc>>, OidcError> {
    let Some(value) = claims.get(name) else {
        return Ok(None);
    };
    #[allow(clippy::cast_possible_truncation)]
    let seconds = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| OidcError::claim(name, "must be a number"))?;
    DateTime::from_timestamp(seconds, 0)
        .map(Some)
        .ok_or_else(|| OidcError::claim(name, "out of range"))
}
