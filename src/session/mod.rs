//! Session management
//!
//! - [`store`] - server-side session state and the [`SessionStore`] seam
//! - [`identity`] - the authenticated identity bound to a session
//! - [`cookie`] - the cookie that carries the opaque session id

pub mod cookie;
pub mod identity;
pub mod store;

pub use cookie::{session_id_from_request, CookieFactory, CookieOptions, SESSION_COOKIE_NAME};
pub use identity::{AuthenticatedIdentity, UserInfo};
pub use store::{InMemorySessionStore, PendingLogin, Session, SessionData, SessionStore};
