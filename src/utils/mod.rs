pub mod clock;
pub mod crypto;
pub mod logging;
pub mod redirect_validator;
pub mod responses;

pub use clock::{Clock, FixedClock, SystemClock};
pub use crypto::{generate_csrf_token, generate_nonce, generate_session_id};
pub use logging::LoggingHelper;
pub use redirect_validator::validate_post_auth_redirect;
pub use responses::ResponseBuilder;
