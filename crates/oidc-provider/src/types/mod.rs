//! Domain types shared by the protocol components and storage.
//!
//! - [`Client`] - registered client
//! - [`AuthorizationRequest`] / [`AuthorizationCode`] - authorization state
//! - [`TokenRecord`] - issued access and refresh tokens

pub mod authorization;
pub mod client;
pub mod token;

pub use authorization::{AuthRequestStatus, AuthorizationCode, AuthorizationRequest};
pub use client::{Client, ClientType, ClientValidationError, GrantType, TokenEndpointAuthMethod};
pub use token::{TokenKind, TokenRecord, expires_after, generate_token, hash_token};
