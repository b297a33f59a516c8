//! Authorization endpoint handlers.
//!
//! # Flow
//!
//! ```text
//! GET|POST <authorization endpoint>?client_id=...&redirect_uri=...
//!     ├─► Unknown client / unregistered redirect_uri → 400, rendered here
//!     ├─► Other validation error → 302 to redirect_uri with error
//!     └─► Valid → stored as pending → 302 to the login UI
//! ```

use axum::Form;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};

use super::ProviderState;
use crate::error::AuthError;
use crate::oauth::authorize::{AuthorizationParams, AuthorizeError};
use crate::oauth::token::TokenErrorResponse;

/// Handler for `GET` on the authorization endpoint.
pub async fn authorize_get(
    State(state): State<ProviderState>,
    params: Result<Query<AuthorizationParams>, QueryRejection>,
) -> Response {
    match params {
        Ok(Query(params)) => authorize(&state, params).await,
        Err(rejection) => malformed(rejection.body_text()),
    }
}

/// Handler for `POST` on the authorization endpoint (form encoded).
pub async fn authorize_post(
    State(state): State<ProviderState>,
    params: Result<Form<AuthorizationParams>, FormRejection>,
) -> Response {
    match params {
        Ok(Form(params)) => authorize(&state, params).await,
        Err(rejection) => malformed(rejection.body_text()),
    }
}

async fn authorize(state: &ProviderState, params: AuthorizationParams) -> Response {
    match state.provider.authorization().authorize(params).await {
        Ok(pending) => found(&pending.login_redirect),
        Err(err) => {
            log_rejection(err.error());
            match err.redirect_url() {
                Some(location) => found(&location),
                None => {
                    let error = match err {
                        AuthorizeError::Inline(error) | AuthorizeError::Redirect { error, .. } => {
                            error
                        }
                    };
                    render_error(&error)
                }
            }
        }
    }
}

fn log_rejection(error: &AuthError) {
    if error.is_server_error() {
        tracing::error!(
            error = %error,
            category = %error.category(),
            "Authorization request failed"
        );
    } else {
        tracing::debug!(
            error = %error,
            category = %error.category(),
            "Authorization request rejected"
        );
    }
}

/// Duplicate or undecodable parameters. Nothing is trusted, so render.
fn malformed(detail: String) -> Response {
    tracing::debug!(detail = %detail, "Malformed authorization request");
    render_error(&AuthError::invalid_request(format!(
        "Malformed authorization request: {}",
        detail
    )))
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn render_error(error: &AuthError) -> Response {
    let status = if error.is_server_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        [(header::CACHE_CONTROL, "no-store")],
        Json(TokenErrorResponse::from(error)),
    )
        .into_response()
}
