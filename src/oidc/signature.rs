// ID token signature verification with JWKS discovery and caching
// Supports RS256 and ES256 against the provider's published keys and HS256
// against the client secret

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::{debug, warn};
use p256::{
    ecdsa::{Signature as EcdsaSignature, VerifyingKey as EcdsaVerifyingKey},
    EncodedPoint,
};
use rsa::{pkcs1v15::VerifyingKey as RsaVerifyingKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::error::OidcError;
use crate::oidc::configuration::OpenIdConfiguration;
use crate::oidc::jwt::DecodedJwt;
use crate::utils::Clock;

pub const DEFAULT_JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600);
const FETCH_RETRY_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JsonWebKey {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,

    // RSA
    pub n: Option<String>,
    pub e: Option<String>,

    // EC
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

impl JsonWebKey {
    fn usable_for(&self, kty: &str) -> bool {
        self.kty == kty && self.key_use.as_deref().is_none_or(|u| u == "sig")
    }
}

pub struct JwksCache {
    keys: Vec<JsonWebKey>,
    last_updated: Option<DateTime<Utc>>,
    last_failed: Option<DateTime<Utc>>,
    cache_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl JwksCache {
    #[must_use]
    pub fn new(cache_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: Vec::new(),
            last_updated: None,
            last_failed: None,
            cache_duration,
            clock,
        }
    }

    /// Whether cached keys are younger than the cache duration
    #[must_use]
    pub fn is_cache_valid(&self) -> bool {
        self.last_updated.is_some_and(|updated| {
            let elapsed = self.clock.now().signed_duration_since(updated);
            elapsed.to_std().unwrap_or(Duration::MAX) < self.cache_duration
        })
    }

    #[must_use]
    pub fn should_retry_fetch(&self) -> bool {
        self.last_failed.is_none_or(|failed| {
            let elapsed = self.clock.now().signed_duration_since(failed);
            elapsed.to_std().unwrap_or(Duration::MAX) >= FETCH_RETRY_BACKOFF
        })
    }

    /// Find the key for a token header
    ///
    /// With a `kid` the match is exact. Without one, the key is used only if
    /// it is the single signing key of the right type.
    #[must_use]
    pub fn get_key(&self, kid: Option<&str>, kty: &str) -> Option<&JsonWebKey> {
        if let Some(kid) = kid {
            return self
                .keys
                .iter()
                .find(|key| key.kid.as_deref() == Some(kid) && key.usable_for(kty));
        }
        let mut candidates = self.keys.iter().filter(|key| key.usable_for(kty));
        match (candidates.next(), candidates.next()) {
            (Some(key), None) => Some(key),
            _ => None,
        }
    }

    pub fn store_keys(&mut self, keys: Vec<JsonWebKey>) {
        debug!("💾 Cached {} signing keys", keys.len());
        self.keys = keys;
        self.last_updated = Some(self.clock.now());
        self.last_failed = None;
    }

    pub fn record_fetch_failure(&mut self) {
        self.last_failed = Some(self.clock.now());
    }
}

/// Verifies ID token signatures before their claims are trusted
#[derive(Clone)]
pub struct SignatureVerifier {
    cache: Arc<RwLock<JwksCache>>,
    jwks_uri: Option<String>,
    // Empty when the provider advertised nothing
    algorithms: Vec<String>,
    client_secret: String,
    http_client: reqwest::Client,
}

impl SignatureVerifier {
    /// Create a verifier for the configured provider
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if the HTTP client cannot be built
    pub fn new(
        configuration: &OpenIdConfiguration,
        cache_duration: Duration,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, OidcError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OidcError::InvalidSignature(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            cache: Arc::new(RwLock::new(JwksCache::new(cache_duration, clock))),
            jwks_uri: configuration.jwks_uri().map(ToString::to_string),
            algorithms: configuration.signing_algorithms().to_vec(),
            client_secret: configuration.client_secret().to_string(),
            http_client,
        })
    }

    /// Seed the key cache, e.g. from keys distributed out of band
    pub async fn store_keys(&self, keys: Vec<JsonWebKey>) {
        self.cache.write().await.store_keys(keys);
    }

    /// Verify the token's signature
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if the algorithm is `none`, unsupported or
    /// not advertised by the provider, no matching key can be found, or the
    /// signature does not verify
    pub async fn verify(&self, jwt: &DecodedJwt) -> Result<(), OidcError> {
        let alg = jwt.header.alg.as_str();
        if !self.algorithms.is_empty() && !self.algorithms.iter().any(|advertised| advertised == alg) {
            return Err(OidcError::InvalidSignature(format!(
                "algorithm '{alg}' is not advertised by the provider"
            )));
        }

        let signing_input = jwt.signing_input().as_bytes();
        match alg {
            "HS256" => verify_hs256(signing_input, &jwt.signature, &self.client_secret),
            "RS256" => {
                let key = self.resolve_key(jwt.header.kid.as_deref(), "RSA").await?;
                verify_rs256(signing_input, &jwt.signature, &key)
            }
            "ES256" => {
                let key = self.resolve_key(jwt.header.kid.as_deref(), "EC").await?;
                verify_es256(signing_input, &jwt.signature, &key)
            }
            _ => Err(OidcError::InvalidSignature(format!(
                "unsupported algorithm '{alg}'"
            ))),
        }?;
        debug!("✅ ID token signature verified ({})", jwt.header.alg);
        Ok(())
    }

    /// Look the key up in the cache, refetching the JWKS once on a miss
    async fn resolve_key(&self, kid: Option<&str>, kty: &str) -> Result<JsonWebKey, OidcError> {
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache.get_key(kid, kty) {
                if cache.is_cache_valid() || self.jwks_uri.is_none() {
                    return Ok(key.clone());
                }
            }
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        cache.get_key(kid, kty).cloned().ok_or_else(|| {
            OidcError::InvalidSignature(format!(
                "no {kty} signing key matches kid {}",
                kid.unwrap_or("<none>")
            ))
        })
    }

    async fn refresh(&self) -> Result<(), OidcError> {
        let Some(jwks_uri) = self.jwks_uri.as_deref() else {
            return Err(OidcError::InvalidSignature(
                "provider publishes no jwks_uri".to_string(),
            ));
        };

        if !self.cache.read().await.should_retry_fetch() {
            return Err(OidcError::InvalidSignature(
                "skipping JWKS fetch after a recent failure".to_string(),
            ));
        }

        debug!("🔑 Fetching JWKS from {jwks_uri}");
        match self.fetch_jwks(jwks_uri).await {
            Ok(keys) => {
                self.cache.write().await.store_keys(keys);
                Ok(())
            }
            Err(e) => {
                warn!("JWKS fetch from {jwks_uri} failed: {e}");
                self.cache.write().await.record_fetch_failure();
                Err(e)
            }
        }
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<Vec<JsonWebKey>, OidcError> {
        let response = self
            .http_client
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::InvalidSignature(format!("Failed to fetch JWKS: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::InvalidSignature(format!(
                "JWKS request failed with status: {}",
                response.status()
            )));
        }

        let jwks: JsonWebKeySet = response
            .json()
            .await
            .map_err(|e| OidcError::InvalidSignature(format!("Failed to parse JWKS: {e}")))?;
        Ok(jwks.keys)
    }
}

fn verify_hs256(signing_input: &[u8], signature: &[u8], secret: &str) -> Result<(), OidcError> {
    if secret.is_empty() {
        return Err(OidcError::InvalidSignature(
            "HS256 requires a client secret".to_string(),
        ));
    }
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| OidcError::InvalidSignature(format!("Invalid HMAC key: {e}")))?;
    mac.update(signing_input);
    mac.verify_slice(signature)
        .map_err(|_| OidcError::InvalidSignature("HS256 signature mismatch".to_string()))
}

fn decode_key_component(value: Option<&String>, name: &str) -> Result<Vec<u8>, OidcError> {
    let value = value.ok_or_else(|| OidcError::InvalidSignature(format!("JWK missing '{name}'")))?;
    general_purpose::URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| OidcError::InvalidSignature(format!("Invalid JWK '{name}' encoding: {e}")))
}

fn verify_rs256(signing_input: &[u8], signature: &[u8], key: &JsonWebKey) -> Result<(), OidcError> {
    use rsa::signature::Verifier;

    let n = decode_key_component(key.n.as_ref(), "n")?;
    let e = decode_key_component(key.e.as_ref(), "e")?;
    let public_key = RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(&n),
        rsa::BigUint::from_bytes_be(&e),
    )
    .map_err(|e| OidcError::InvalidSignature(format!("Invalid RSA key: {e}")))?;

    let signature = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|e| OidcError::InvalidSignature(format!("Invalid signature format: {e}")))?;

    RsaVerifyingKey::<Sha256>::new(public_key)
        .verify(signing_input, &signature)
        .map_err(|_| OidcError::InvalidSignature("RS256 signature mismatch".to_string()))
}

fn verify_es256(signing_input: &[u8], signature: &[u8], key: &JsonWebKey) -> Result<(), OidcError> {
    use p256::ecdsa::signature::Verifier;

    if key.crv.as_deref().is_some_and(|crv| crv != "P-256") {
        return Err(OidcError::InvalidSignature(format!(
            "ES256 requires a P-256 key, got {:?}",
            key.crv
        )));
    }

    let x = decode_key_component(key.x.as_ref(), "x")?;
    let y = decode_key_component(key.y.as_ref(), "y")?;

    // Uncompressed SEC1 point: 0x04 || x || y
    let mut point_bytes = Vec::with_capacity(1 + x.len() + y.len());
    point_bytes.push(0x04);
    point_bytes.extend_from_slice(&x);
    point_bytes.extend_from_slice(&y);

    let encoded_point = EncodedPoint::from_bytes(&point_bytes)
        .map_err(|e| OidcError::InvalidSignature(format!("Invalid EC point: {e}")))?;
    let verifying_key = EcdsaVerifyingKey::from_encoded_point(&encoded_point)
        .map_err(|e| OidcError::InvalidSignature(format!("Invalid ECDSA key: {e}")))?;

    // JWS carries the raw 64-byte r || s form, not DER
    let signature = EcdsaSignature::from_slice(signature)
        .map_err(|e| OidcError::InvalidSignature(format!("Invalid signature format: {e}")))?;

    verifying_key
        .verify(signing_input, &signature)
        .map_err(|_| OidcError::InvalidSignature("ES256 signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::jwt::decode;
    use crate::utils::{FixedClock, SystemClock};
    use p256::ecdsa::{signature::Signer, SigningKey};

    fn configuration(jwks_uri: Option<&str>) -> OpenIdConfiguration {
        let mut builder = OpenIdConfiguration::builder(
            "https://idp.example.com",
            "client-1",
            "client-secret",
            "https://app.example.com/j_security_check",
        )
        .authorization_endpoint("https://idp.example.com/auth")
        .token_endpoint("https://idp.example.com/token");
        if let Some(uri) = jwks_uri {
            builder = builder.jwks_uri(uri);
        }
        builder.build().unwrap()
    }

    fn verifier(jwks_uri: Option<&str>) -> SignatureVerifier {
        SignatureVerifier::new(
            &configuration(jwks_uri),
            DEFAULT_JWKS_CACHE_DURATION,
            Duration::from_secs(1),
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    fn segment(json: &str) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    fn hs256_token(secret: &str) -> String {
        let input = format!(
            "{}.{}",
            segment(r#"{"alg":"HS256","typ":"JWT"}"#),
            segment(r#"{"sub":"u1"}"#)
        );
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(input.as_bytes());
        let sig = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{input}.{sig}")
    }

    fn ec_signing_key() -> SigningKey {
        SigningKey::from_slice(&[0x11; 32]).unwrap()
    }

    fn ec_jwk(kid: &str) -> JsonWebKey {
        let point = ec_signing_key().verifying_key().to_encoded_point(false);
        JsonWebKey {
            kty: "EC".to_string(),
            kid: Some(kid.to_string()),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            crv: Some("P-256".to_string()),
            x: Some(general_purpose::URL_SAFE_NO_PAD.encode(point.x().unwrap())),
            y: Some(general_purpose::URL_SAFE_NO_PAD.encode(point.y().unwrap())),
            ..JsonWebKey::default()
        }
    }

    fn es256_token(kid: &str, payload: &str) -> String {
        let input = format!(
            "{}.{}",
            segment(&format!(r#"{{"alg":"ES256","kid":"{kid}"}}"#)),
            segment(payload)
        );
        let signature: EcdsaSignature = ec_signing_key().sign(input.as_bytes());
        let sig = general_purpose::URL_SAFE_NO_PAD.encode(signature.to_bytes());
        format!("{input}.{sig}")
    }

    #[tokio::test]
    async fn test_hs256_with_client_secret() {
        let verifier = verifier(None);
        let good = decode(&hs256_token("client-secret")).unwrap();
        assert!(verifier.verify(&good).await.is_ok());

        let bad = decode(&hs256_token("wrong-secret")).unwrap();
        assert!(matches!(
            verifier.verify(&bad).await,
            Err(OidcError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_alg_none_is_rejected() {
        let token = format!(
            "{}.{}.{}",
            segment(r#"{"alg":"none"}"#),
            segment(r#"{"sub":"u1"}"#),
            segment("x")
        );
        let jwt = decode(&token).unwrap();
        assert!(matches!(
            verifier(None).verify(&jwt).await,
            Err(OidcError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_es256_with_cached_key() {
        let verifier = verifier(None);
        verifier.store_keys(vec![ec_jwk("ec-1")]).await;

        let jwt = decode(&es256_token("ec-1", r#"{"sub":"u1"}"#)).unwrap();
        assert!(verifier.verify(&jwt).await.is_ok());

        // Payload swapped after signing
        let token = es256_token("ec-1", r#"{"sub":"u1"}"#);
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], segment(r#"{"sub":"admin"}"#), parts[2]);
        assert!(verifier.verify(&decode(&forged).unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_kid_without_jwks_uri() {
        let verifier = verifier(None);
        verifier.store_keys(vec![ec_jwk("ec-1")]).await;
        let jwt = decode(&es256_token("rotated", r#"{"sub":"u1"}"#)).unwrap();
        assert!(matches!(
            verifier.verify(&jwt).await,
            Err(OidcError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_algorithm_not_advertised_is_rejected() {
        let configuration = OpenIdConfiguration::builder(
            "https://idp.example.com",
            "client-1",
            "client-secret",
            "https://app.example.com/j_security_check",
        )
        .authorization_endpoint("https://idp.example.com/auth")
        .token_endpoint("https://idp.example.com/token")
        .signing_algorithms(["ES256"])
        .build()
        .unwrap();
        let verifier = SignatureVerifier::new(
            &configuration,
            DEFAULT_JWKS_CACHE_DURATION,
            Duration::from_secs(1),
            Arc::new(SystemClock),
        )
        .unwrap();
        verifier.store_keys(vec![ec_jwk("ec-1")]).await;

        // Correctly MACed with the client secret, but the provider only signs ES256
        let hs256 = decode(&hs256_token("client-secret")).unwrap();
        assert_eq!(
            verifier.verify(&hs256).await,
            Err(OidcError::InvalidSignature(
                "algorithm 'HS256' is not advertised by the provider".to_string()
            ))
        );

        let es256 = decode(&es256_token("ec-1", r#"{"sub":"u1"}"#)).unwrap();
        assert!(verifier.verify(&es256).await.is_ok());
    }

    #[test]
    fn test_jwks_cache_key_selection() {
        let mut cache = JwksCache::new(DEFAULT_JWKS_CACHE_DURATION, Arc::new(SystemClock));
        assert!(!cache.is_cache_valid());
        assert!(cache.should_retry_fetch());

        cache.store_keys(vec![
            ec_jwk("a"),
            JsonWebKey {
                kty: "RSA".to_string(),
                kid: Some("r".to_string()),
                n: Some("AQAB".to_string()),
                e: Some("AQAB".to_string()),
                ..JsonWebKey::default()
            },
        ]);
        assert!(cache.is_cache_valid());
        assert!(cache.get_key(Some("a"), "EC").is_some());
        assert!(cache.get_key(Some("a"), "RSA").is_none());
        assert!(cache.get_key(None, "RSA").is_some());

        cache.store_keys(vec![ec_jwk("a"), ec_jwk("b")]);
        assert!(cache.get_key(None, "EC").is_none());
    }

    #[test]
    fn test_failed_fetch_backs_off() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let mut cache = JwksCache::new(DEFAULT_JWKS_CACHE_DURATION, clock.clone());
        cache.record_fetch_failure();
        assert!(!cache.should_retry_fetch());

        clock.advance(chrono::Duration::seconds(29));
        assert!(!cache.should_retry_fetch());
        clock.advance(chrono::Duration::seconds(2));
        assert!(cache.should_retry_fetch());
    }

    #[test]
    fn test_cached_keys_expire() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let mut cache = JwksCache::new(Duration::from_secs(600), clock.clone());
        cache.store_keys(vec![ec_jwk("a")]);
        assert!(cache.is_cache_valid());

        clock.advance(chrono::Duration::seconds(599));
        assert!(cache.is_cache_valid());
        clock.advance(chrono::Duration::seconds(1));
        assert!(!cache.is_cache_valid());

        // A successful refetch clears any failure backoff
        cache.record_fetch_failure();
        cache.store_keys(vec![ec_jwk("a")]);
        assert!(cache.is_cache_valid());
        assert!(cache.should_retry_fetch());
    }

    #[test]
    fn test_rs256_rejects_garbage_key() {
        let key = JsonWebKey {
            kty: "RSA".to_string(),
            n: Some("not base64!".to_string()),
            e: Some("AQAB".to_string()),
            ..JsonWebKey::default()
        };
        assert!(matches!(
            verify_rs256(b"a.b", b"sig", &key),
            Err(OidcError::InvalidSignature(_))
        ));
    }
}
