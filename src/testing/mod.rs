//! Testing utilities for the OIDC login flow
//!
//! Available to unit tests and, with the `testing` feature, to integration
//! tests.
//!
//! - [`fixtures`] - a ready-made provider configuration and authenticator harness
//! - [`builders`] - [`IdTokenBuilder`] for minting signed ID tokens
//! - [`mock`] - [`FakeTokenClient`], a scripted token endpoint
//!
//! ## Usage
//!
//! ```rust,ignore
//! use oidc_gate::testing::TestHarness;
//!
//! let harness = TestHarness::new();
//! let challenge = harness.challenge("/profile").await;
//! harness.token_client.set_id_token(harness.id_token(challenge.nonce.as_deref()).sign());
//! let outcome = harness.callback(&challenge).await;
//! ```

pub mod builders;
pub mod fixtures;
pub mod mock;

pub use builders::IdTokenBuilder;
pub use fixtures::{query_param, test_configuration, Challenge, TestHarness};
pub use mock::FakeTokenClient;

/// Common test constants
pub mod constants {
    pub const TEST_ISSUER: &str = "https://idp.example.com";

    pub const TEST_CLIENT_ID: &str = "test-client";

    pub const TEST_CLIENT_SECRET: &str = "test-client-secret";

    pub const TEST_REDIRECT_URI: &str = "http://localhost:8080/j_security_check";

    pub const TEST_SUBJECT: &str = "user-123";

    pub const TEST_EMAIL: &str = "test@example.com";

    pub const TEST_USER_NAME: &str = "Test User";
}
