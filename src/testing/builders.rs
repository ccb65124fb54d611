//! Fluent builder for ID tokens

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use super::constants::{TEST_CLIENT_ID, TEST_CLIENT_SECRET, TEST_EMAIL, TEST_ISSUER, TEST_SUBJECT, TEST_USER_NAME};
use crate::oidc::Claims;

/// Mints compact ID tokens signed with HS256
///
/// Starts from claims a freshly issued token for the test client would
/// carry; individual claims can then be overridden or removed.
#[derive(Debug, Clone)]
pub struct IdTokenBuilder {
    claims: Claims,
    secret: String,
    alg: String,
}

impl IdTokenBuilder {
    /// Valid token issued at `now`, expiring an hour later
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut claims = Claims::new();
        claims.insert("iss".into(), json!(TEST_ISSUER));
        claims.insert("sub".into(), json!(TEST_SUBJECT));
        claims.insert("aud".into(), json!(TEST_CLIENT_ID));
        claims.insert("iat".into(), json!(now.timestamp()));
        claims.insert("exp".into(), json!((now + Duration::hours(1)).timestamp()));
        claims.insert("email".into(), json!(TEST_EMAIL));
        claims.insert("name".into(), json!(TEST_USER_NAME));
        Self {
            claims,
            secret: TEST_CLIENT_SECRET.to_string(),
            alg: "HS256".to_string(),
        }
    }

    #[must_use]
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    #[must_use]
    pub fn nonce(self, nonce: Option<&str>) -> Self {
        match nonce {
            Some(nonce) => self.claim("nonce", json!(nonce)),
            None => self.without("nonce"),
        }
    }

    #[must_use]
    pub fn subject(self, sub: &str) -> Self {
        self.claim("sub", json!(sub))
    }

    #[must_use]
    pub fn expires_at(self, exp: DateTime<Utc>) -> Self {
        self.claim("exp", json!(exp.timestamp()))
    }

    /// HMAC key; defaults to the test client secret
    #[must_use]
    pub fn secret(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    /// Header `alg`; the signature is still HMAC-SHA256
    #[must_use]
    pub fn alg(mut self, alg: &str) -> Self {
        self.alg = alg.to_string();
        self
    }

    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Serialize and sign
    ///
    /// # Panics
    ///
    /// Panics if the claims cannot be serialized
    #[must_use]
    pub fn sign(&self) -> String {
        let header = json!({"alg": self.alg, "typ": "JWT"});
        let header = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload = general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&self.claims).expect("claims serialize"));
        let signing_input = format!("{header}.{payload}");

        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(signing_input.as_bytes());
        let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{signing_input}.{signature}")
    }
}
