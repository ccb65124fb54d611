use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

// Post-login redirects must stay inside this application: only local
// absolute paths pass.

static PATH_TRAVERSAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.\.").unwrap()
});

// Scheme prefix or protocol-relative `//`
static PROTOCOL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:[a-z][a-z0-9+.-]*:)|^(?:/{2,})").unwrap()
});

// Control characters, backslashes and encoded CR/LF/NUL
static SUSPICIOUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\x00-\x1F\x7F]|%(?:00|0a|0d|5c)|\\").unwrap()
});

const MAX_REDIRECT_LEN: usize = 2048;

/// Validate the URI a user originally requested before it is used as the
/// post-login redirect target
///
/// Returns `None` when the value is not a safe local path; callers fall back
/// to the landing page.
#[must_use]
pub fn validate_post_auth_redirect(redirect_url: &str) -> Option<String> {
    debug!("Validating post-authentication redirect URL: {redirect_url}");

    if redirect_url.len() > MAX_REDIRECT_LEN {
        warn!(
            "Excessively long redirect URL: {} characters",
            redirect_url.len()
        );
        return None;
    }

    if !is_relative_url(redirect_url) {
        warn!("Rejected non-local redirect URL: {redirect_url}");
        return None;
    }

    for decoded in get_decoded_variants(redirect_url) {
        if PATH_TRAVERSAL_PATTERN.is_match(&decoded)
            || PROTOCOL_PATTERN.is_match(&decoded)
            || SUSPICIOUS_PATTERN.is_match(&decoded)
        {
            warn!("Suspicious pattern detected in redirect: {redirect_url} -> {decoded}");
            return None;
        }
    }

    Some(redirect_url.to_string())
}

/// Check if URL is relative (starts with /, not //, and has no scheme)
fn is_relative_url(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.contains("://")
}

/// Original value plus single and double URL-decoded forms
fn get_decoded_variants(request_path: &str) -> Vec<String> {
    let mut variants = Vec::with_capacity(3);
    variants.push(request_path.to_string());

    if let Ok(decoded) = urlencoding::decode(request_path) {
        let decoded_string = decoded.into_owned();
        if decoded_string != request_path {
            if let Ok(double_decoded) = urlencoding::decode(&decoded_string) {
                let double_decoded_string = double_decoded.into_owned();
                if double_decoded_string != decoded_string {
                    variants.push(double_decoded_string);
                }
            }
            variants.push(decoded_string);
        }
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::validate_post_auth_redirect;

    #[test]
    fn test_local_paths_are_allowed() {
        for url in ["/", "/profile", "/admin?tab=users", "/a/b/c#frag"] {
            assert_eq!(validate_post_auth_redirect(url), Some(url.to_string()));
        }
    }

    #[test]
    fn test_open_redirects_are_rejected() {
        for url in [
            "https://evil.example.com/",
            "//evil.example.com",
            "javascript:alert(1)",
            "/%2F%2Fevil.example.com",
            "/../etc/passwd",
            "/%2e%2e/admin",
            "/foo\\bar",
            "/foo%0d%0aSet-Cookie:x",
            "profile",
        ] {
            assert_eq!(validate_post_auth_redirect(url), None, "{url}");
        }
    }

    #[test]
    fn test_overlong_paths_are_rejected() {
        let url = format!("/{}", "a".repeat(4096));
        assert_eq!(validate_post_auth_redirect(&url), None);
    }
}
