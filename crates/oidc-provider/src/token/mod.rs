//! Token generation, validation, and management.
//!
//! - Signing keys and JWT encoding/decoding
//! - Authorization code exchange
//! - Refresh token rotation and family revocation

pub mod jwt;
pub mod service;

pub use jwt::{
    AccessTokenClaims, IdTokenClaims, Jwk, Jwks, JwtError, JwtService, SigningAlgorithm,
    SigningKeyPair,
};
pub use service::{Grant, OFFLINE_ACCESS_SCOPE, TokenService};
