//! Token endpoint handler.
//!
//! Accepts `application/x-www-form-urlencoded` bodies (RFC 6749 Section 3.2).
//! Client credentials come from the `Authorization` header or the form.

use axum::Form;
use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};

use super::ProviderState;
use crate::error::AuthError;
use crate::oauth::token::{TokenErrorResponse, TokenRequest, TokenResponse};

/// Handler for `POST` on the token endpoint.
pub async fn token_handler(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let request = match form {
        Ok(Form(request)) => request,
        Err(rejection) => {
            return token_error_response(&AuthError::invalid_request(format!(
                "Malformed token request: {}",
                rejection.body_text()
            )));
        }
    };

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match state.provider.token(authorization, &request).await {
        Ok(response) => token_success_response(response),
        Err(error) => {
            if error.is_server_error() {
                tracing::error!(
                    error = %error,
                    category = %error.category(),
                    "Token request failed"
                );
            } else {
                tracing::debug!(
                    error = %error,
                    category = %error.category(),
                    "Token request rejected"
                );
            }
            token_error_response(&error)
        }
    }
}

fn token_success_response(response: TokenResponse) -> Response {
    (
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response()
}

fn token_error_response(error: &AuthError) -> Response {
    let body = Json(TokenErrorResponse::from(error));
    let no_cache = [
        (header::CACHE_CONTROL, "no-store"),
        (header::PRAGMA, "no-cache"),
    ];

    match error {
        AuthError::InvalidClient { .. } => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic")],
            no_cache,
            body,
        )
            .into_response(),
        _ if error.is_server_error() => {
            (StatusCode::INTERNAL_SERVER_ERROR, no_cache, body).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, no_cache, body).into_response(),
    }
}
