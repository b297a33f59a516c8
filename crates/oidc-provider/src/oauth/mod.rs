//! OAuth 2.0 / OpenID Connect protocol engine.
//!
//! - [`authorize`] - Request/response types for the authorization endpoint
//! - [`service`] - Authorization request validation and code issuance
//! - [`request_object`] - Signed `request` parameter support
//! - [`client_auth`] - Token endpoint client authentication
//! - [`client_assertion`] - `private_key_jwt` assertions
//! - [`pkce`] - PKCE challenge/verifier implementation
//! - [`token`] - Token endpoint request/response types
//!
//! # Example
//!
//! ```ignore
//! use oidc_provider::oauth::{AuthorizationParams, AuthorizationService};
//!
//! // Browser hits the authorization endpoint
//! let pending = service.authorize(params).await?;
//! // redirect to pending.login_redirect
//!
//! // Login UI verified the user
//! let redirect_url = service.complete_authorization(pending.request_id, "alice").await?;
//! ```

pub mod authorize;
pub mod client_assertion;
pub mod client_auth;
pub mod pkce;
pub mod request_object;
pub mod service;
pub mod token;

// Authorization endpoint types
pub use authorize::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationParams, AuthorizationResponse,
    AuthorizeError, PendingAuthorization,
};

// Client assertion types (for private_key_jwt authentication)
pub use client_assertion::{
    ClientAssertionClaims, ClientAssertionValidator, JWT_BEARER_ASSERTION_TYPE, StringOrArray,
};

// Client authentication
pub use client_auth::{AuthenticatedClient, ClientAuthenticator, ClientCredentials};

// PKCE types
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};

// Request objects
pub use request_object::RequestObjectVerifier;

// Service types
pub use service::AuthorizationService;

// Token endpoint types
pub use token::{TokenErrorResponse, TokenRequest, TokenResponse};
