//! JWKS endpoint handler.
//!
//! Publishes the public half of the signing key so relying parties can
//! verify ID tokens. HS256 deployments publish an empty set.
//!
//! # References
//!
//! - [RFC 7517 - JSON Web Key](https://tools.ietf.org/html/rfc7517)

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::ProviderState;

/// Handler for `GET` on the JWKS endpoint.
///
/// Responses may be cached by clients for one hour.
pub async fn jwks_handler(State(state): State<ProviderState>) -> impl IntoResponse {
    let jwks = state.provider.jwt_service().jwks();

    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(jwks),
    )
}
