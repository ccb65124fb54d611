// Cryptographic utilities for generating secure tokens and nonces

use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;

/// Generate a cryptographically secure CSRF token for the OAuth `state` parameter
///
/// 24 bytes (192 bits) of entropy, base64url encoded to 32 characters.
#[must_use]
pub fn generate_csrf_token() -> String {
    generate_nonce(24)
}

/// Generate a cryptographically secure nonce of specified byte length
///
/// # Arguments
///
/// * `length` - Number of bytes to generate (recommended: 16-32 for most use cases)
///
/// # Returns
///
/// A base64url-encoded string representing the specified bytes of random data
#[must_use]
pub fn generate_nonce(length: usize) -> String {
    let mut nonce = vec![0u8; length];
    rand::rng().fill_bytes(&mut nonce);
    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}

/// Generate an opaque session identifier (256 bits)
#[must_use]
pub fn generate_session_id() -> String {
    generate_nonce(32)
}

/// Constant-time string comparison for secrets received from the network
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
