//! Compact JWT decoding
//!
//! Splits an ID token into its three segments and decodes header and payload
//! without verifying anything. Signature checks live in
//! [`crate::oidc::signature`] and claim checks in [`crate::oidc::claims`].

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::OidcError;

/// Claim name to value mapping decoded from the payload segment
pub type Claims = Map<String, Value>;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: Option<String>,
    pub kid: Option<String>,
}

/// A structurally valid compact token
#[derive(Debug, Clone)]
pub struct DecodedJwt {
    pub header: JwtHeader,
    pub claims: Claims,
    /// Raw signature bytes; opaque until a verifier looks at them
    pub signature: Vec<u8>,
    signing_input: String,
}

impl DecodedJwt {
    /// `header.payload` exactly as received, the input to signature verification
    #[must_use]
    pub fn signing_input(&self) -> &str {
        &self.signing_input
    }

    /// The payload segment exactly as received
    #[must_use]
    pub fn payload_segment(&self) -> &str {
        self.signing_input
            .split_once('.')
            .map_or("", |(_, payload)| payload)
    }
}

/// Decode a compact token into header, claims and signature
///
/// # Errors
///
/// Returns `MalformedToken` if:
/// - The token does not have exactly three non-empty `.`-separated segments
/// - The header or payload is not base64url
/// - The header or payload is not a JSON object
/// - The header has no `alg`
pub fn decode(token: &str) -> Result<DecodedJwt, OidcError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(OidcError::MalformedToken(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }
    if parts.iter().any(|part| part.is_empty()) {
        return Err(OidcError::MalformedToken("empty segment".to_string()));
    }

    let header_bytes = decode_segment(parts[0], "header")?;
    let header: JwtHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| OidcError::MalformedToken(format!("Invalid header JSON: {e}")))?;

    let payload_bytes = decode_segment(parts[1], "payload")?;
    let claims = match serde_json::from_slice::<Value>(&payload_bytes) {
        Ok(Value::Object(claims)) => claims,
        Ok(_) => {
            return Err(OidcError::MalformedToken(
                "payload is not a JSON object".to_string(),
            ))
        }
        Err(e) => {
            return Err(OidcError::MalformedToken(format!(
                "Invalid payload JSON: {e}"
            )))
        }
    };

    let signature = decode_segment(parts[2], "signature")
        .unwrap_or_else(|_| parts[2].as_bytes().to_vec());

    Ok(DecodedJwt {
        header,
        claims,
        signature,
        signing_input: format!("{}.{}", parts[0], parts[1]),
    })
}

/// Encode a JSON object as an unpadded base64url segment
///
/// # Errors
///
/// Returns `MalformedToken` if the value cannot be serialized
pub fn encode_segment(value: &Claims) -> Result<String, OidcError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| OidcError::MalformedToken(format!("Failed to serialize segment: {e}")))?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(json))
}

/// Base64url decode, tolerating trailing padding and the standard alphabet
fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, OidcError> {
    let trimmed = segment.trim_end_matches('=');
    general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| OidcError::MalformedToken(format!("Invalid {name} encoding: {e}")))
}
