use actix_web::{
    cookie::{time::Duration as CookieDuration, Cookie, SameSite},
    HttpRequest,
};

/// Name of the cookie carrying the opaque session id
pub const SESSION_COOKIE_NAME: &str = "oidc_session";

/// Options for cookie creation
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub max_age: CookieDuration,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            // Lax so the cookie survives the top-level redirect back from the provider
            same_site: SameSite::Lax,
            path: "/".to_string(),
            max_age: CookieDuration::hours(24),
        }
    }
}

/// Builds the session cookie with consistent attributes
#[derive(Debug, Clone)]
pub struct CookieFactory {
    cookie_secure: bool,
    session_duration_hours: u64,
}

impl CookieFactory {
    #[must_use]
    pub fn new(cookie_secure: bool, session_duration_hours: u64) -> Self {
        Self {
            cookie_secure,
            session_duration_hours,
        }
    }

    fn create_cookie(&self, name: &str, value: String, options: CookieOptions) -> Cookie<'static> {
        Cookie::build(name.to_owned(), value)
            .http_only(options.http_only)
            .secure(self.cookie_secure && options.secure)
            .same_site(options.same_site)
            .path(options.path)
            .max_age(options.max_age)
            .finish()
    }

    /// Cookie binding the browser to a server-side session
    #[must_use]
    pub fn create_session_cookie(&self, session_id: &str) -> Cookie<'static> {
        self.create_cookie(
            SESSION_COOKIE_NAME,
            session_id.to_string(),
            CookieOptions {
                max_age: CookieDuration::hours(
                    i64::try_from(self.session_duration_hours).unwrap_or(24),
                ),
                ..Default::default()
            },
        )
    }

    /// Cookie that makes the browser forget its session id
    #[must_use]
    pub fn create_expired_cookie(&self) -> Cookie<'static> {
        self.create_cookie(
            SESSION_COOKIE_NAME,
            String::new(),
            CookieOptions {
                max_age: CookieDuration::seconds(0),
                ..Default::default()
            },
        )
    }
}

/// Session id presented by the browser, if any
#[must_use]
pub fn session_id_from_request(req: &HttpRequest) -> Option<String> {
    req.cookie(SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}
