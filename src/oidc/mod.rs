pub mod claims;
pub mod configuration;
pub mod credentials;
pub mod jwt;
pub mod signature;
pub mod token_client;

pub use claims::ClaimExpectations;
pub use configuration::{OidcDiscoveryDocument, OpenIdConfiguration, OpenIdConfigurationBuilder};
pub use credentials::{OpenIdCredentials, ValidationContext};
pub use jwt::{Claims, DecodedJwt, JwtHeader};
pub use signature::{JsonWebKey, SignatureVerifier};
pub use token_client::{HttpTokenClient, TokenEndpointClient, TokenRequest, TokenResponse};
