//! # oidc-provider
//!
//! OpenID Connect / OAuth 2.0 authorization server core.
//!
//! This crate provides:
//! - Authorization code flow with PKCE (RFC 7636)
//! - Client authentication: secrets, `private_key_jwt`, public clients
//! - Signed request objects
//! - Refresh token rotation with reuse detection
//! - Signed ID and access tokens
//!
//! ## Overview
//!
//! The authorization endpoint validates a request and parks it until the
//! login UI reports an authenticated subject. The provider then issues a
//! single-use code which the client exchanges at the token endpoint. All
//! state lives behind the [`storage::Storage`] contract; [`InMemoryStorage`]
//! is the bundled implementation.
//!
//! User authentication, consent screens and dynamic client registration are
//! left to the embedding application.
//!
//! ## Modules
//!
//! - [`config`] - Provider configuration
//! - [`registry`] - Static client registry
//! - [`oauth`] - Authorization endpoint, client authentication, PKCE
//! - [`token`] - Signing keys, token minting and validation
//! - [`storage`] - Storage contract and implementations
//! - [`http`] - Axum HTTP handlers
//! - [`provider`] - The assembled provider

pub mod config;
pub mod error;
pub mod http;
pub mod oauth;
pub mod provider;
pub mod registry;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{ConfigError, ProviderConfig};
pub use error::{AuthError, ErrorCategory};
pub use http::{ProviderState, router};
pub use oauth::{
    AuthorizationParams, AuthorizationService, AuthorizeError, PendingAuthorization,
    TokenRequest, TokenResponse,
};
pub use provider::Provider;
pub use registry::ClientRegistry;
pub use storage::{
    AuthRequestStorage, InMemoryStorage, JtiStorage, ResilientStorage, Storage, TokenStorage,
};
pub use types::{Client, ClientType, ClientValidationError, GrantType, TokenEndpointAuthMethod};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;
