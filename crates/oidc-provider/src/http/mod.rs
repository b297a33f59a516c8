//! Axum HTTP handlers for the provider endpoints.
//!
//! # Available Handlers
//!
//! - [`authorize`] - Authorization endpoint (GET and POST)
//! - [`token`] - Token endpoint
//! - [`discovery`] - OpenID Connect discovery document
//! - [`jwks`] - Public signing keys
//!
//! Paths for the authorization, token and JWKS endpoints come from
//! `endpoints` in the provider configuration.

pub mod authorize;
pub mod discovery;
pub mod jwks;
pub mod token;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::provider::Provider;

pub use authorize::{authorize_get, authorize_post};
pub use discovery::{DISCOVERY_PATH, openid_configuration_handler};
pub use jwks::jwks_handler;
pub use token::token_handler;

/// Shared state for all provider handlers.
#[derive(Clone)]
pub struct ProviderState {
    /// The provider.
    pub provider: Arc<Provider>,
}

impl ProviderState {
    /// Creates a new state.
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }
}

/// Builds the router for all provider endpoints.
pub fn router(provider: Arc<Provider>) -> Router {
    let endpoints = provider.config().endpoints.clone();

    Router::new()
        .route(
            &endpoints.authorization,
            get(authorize_get).post(authorize_post),
        )
        .route(&endpoints.token, post(token_handler))
        .route(&endpoints.jwks, get(jwks_handler))
        .route(DISCOVERY_PATH, get(openid_configuration_handler))
        .with_state(ProviderState::new(provider))
}
