//! Authorization endpoint types.
//!
//! # OAuth 2.0 Authorization Code Flow
//!
//! 1. Client redirects user to the authorization endpoint
//! 2. The request is validated and stored as `pending`; the browser is sent
//!    to the login UI with the request id
//! 3. The login UI authenticates the user and completes the request
//! 4. The browser is redirected back to the client with a code
//! 5. Client exchanges the code for tokens at the token endpoint
//!
//! Errors found before the redirect URI is known to be registered are
//! rendered to the user directly. Everything later is sent back to the
//! client as `error` / `error_description` query parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AuthError;

/// Authorization request parameters, as received in the query string or
/// form body.
///
/// # Example
///
/// ```ignore
/// GET /auth?
///   response_type=code
///   &client_id=web
///   &redirect_uri=https://app/cb
///   &scope=openid offline_access
///   &state=xyz
///   &code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM
///   &code_challenge_method=S256
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationParams {
    /// Must be "code".
    #[serde(default)]
    pub response_type: Option<String>,

    /// Client identifier issued during registration.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Must exactly match one of the registered redirect URIs.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Requested scopes (space-separated).
    #[serde(default)]
    pub scope: Option<String>,

    /// Opaque client state, echoed back.
    #[serde(default)]
    pub state: Option<String>,

    /// OpenID Connect nonce, echoed in the ID token.
    #[serde(default)]
    pub nonce: Option<String>,

    /// PKCE code challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// PKCE code challenge method, `S256` or `plain`.
    #[serde(default)]
    pub code_challenge_method: Option<String>,

    /// Signed request object (OIDC Core 6.1).
    #[serde(default)]
    pub request: Option<String>,

    /// Request object by reference. Not supported.
    #[serde(default)]
    pub request_uri: Option<String>,
}

/// A request stored in `pending` state, waiting for the login UI.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// Opaque id the login UI resumes against.
    pub request_id: Uuid,

    /// Login UI URL carrying `auth_request_id`.
    pub login_redirect: String,
}

/// Authorization response parameters (code redirect).
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResponse {
    /// Authorization code to be exchanged for tokens.
    pub code: String,

    /// Echoed state parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizationResponse {
    /// Creates a new authorization response.
    #[must_use]
    pub fn new(code: String, state: Option<String>) -> Self {
        Self { code, state }
    }

    /// Builds the redirect URL with response parameters.
    pub fn to_redirect_url(&self, redirect_uri: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if let Some(ref state) = self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// Authorization error response (RFC 6749 Section 4.1.2.1).
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationError {
    /// OAuth 2.0 error code.
    pub error: AuthorizationErrorCode,

    /// Human-readable error description (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// Echoed state parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizationError {
    /// Creates a new authorization error.
    #[must_use]
    pub fn new(error: AuthorizationErrorCode, state: Option<String>) -> Self {
        Self {
            error,
            error_description: None,
            state,
        }
    }

    /// Creates a new authorization error with description.
    #[must_use]
    pub fn with_description(
        error: AuthorizationErrorCode,
        description: impl Into<String>,
        state: Option<String>,
    ) -> Self {
        Self {
            error,
            error_description: Some(description.into()),
            state,
        }
    }

    /// Builds the error from an [`AuthError`].
    #[must_use]
    pub fn from_auth_error(err: &AuthError, state: Option<String>) -> Self {
        Self::with_description(
            AuthorizationErrorCode::from_auth_error(err),
            err.public_description(),
            state,
        )
    }

    /// Builds the redirect URL with error parameters.
    pub fn to_redirect_url(&self, redirect_uri: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("error", self.error.as_str());
            if let Some(ref desc) = self.error_description {
                pairs.append_pair("error_description", desc);
            }
            if let Some(ref state) = self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// OAuth 2.0 authorization error codes.
///
/// RFC 6749 Section 4.1.2.1 plus the OIDC request object codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationErrorCode {
    /// Missing, invalid or repeated parameter.
    InvalidRequest,

    /// The client may not request a code this way.
    UnauthorizedClient,

    /// The resource owner or authorization server denied the request.
    AccessDenied,

    /// Only `code` is supported.
    UnsupportedResponseType,

    /// The requested scope is invalid, unknown, or malformed.
    InvalidScope,

    /// Unexpected condition on the server.
    ServerError,

    /// Temporarily unable to handle the request.
    TemporarilyUnavailable,

    /// The `request` parameter is disabled.
    RequestNotSupported,

    /// The `request_uri` parameter is not supported.
    RequestUriNotSupported,
}

impl AuthorizationErrorCode {
    /// Returns the string representation of the error code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::RequestNotSupported => "request_not_supported",
            Self::RequestUriNotSupported => "request_uri_not_supported",
        }
    }

    /// Maps an [`AuthError`] to the code sent to the client.
    ///
    /// Errors that only exist at the token endpoint fold into
    /// `invalid_request`.
    #[must_use]
    pub fn from_auth_error(err: &AuthError) -> Self {
        match err {
            AuthError::UnauthorizedClient { .. } => Self::UnauthorizedClient,
            AuthError::AccessDenied { .. } => Self::AccessDenied,
            AuthError::UnsupportedResponseType { .. } => Self::UnsupportedResponseType,
            AuthError::InvalidScope { .. } => Self::InvalidScope,
            AuthError::RequestNotSupported => Self::RequestNotSupported,
            AuthError::RequestUriNotSupported => Self::RequestUriNotSupported,
            AuthError::StorageUnavailable { .. } | AuthError::StorageTimeout { .. } => {
                Self::TemporarilyUnavailable
            }
            other if other.is_server_error() => Self::ServerError,
            _ => Self::InvalidRequest,
        }
    }
}

impl fmt::Display for AuthorizationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed authorization request and how it must be reported.
#[derive(Debug)]
pub enum AuthorizeError {
    /// The redirect URI is missing or not registered. Render to the user,
    /// never redirect.
    Inline(AuthError),

    /// Send the error back to the client's registered redirect URI.
    Redirect {
        /// Registered redirect URI.
        redirect_uri: String,
        /// The failure.
        error: AuthError,
        /// Echoed state.
        state: Option<String>,
    },
}

impl AuthorizeError {
    /// The underlying error.
    #[must_use]
    pub fn error(&self) -> &AuthError {
        match self {
            Self::Inline(error) | Self::Redirect { error, .. } => error,
        }
    }

    /// Redirect target carrying the error, or `None` for inline errors.
    #[must_use]
    pub fn redirect_url(&self) -> Option<String> {
        match self {
            Self::Inline(_) => None,
            Self::Redirect {
                redirect_uri,
                error,
                state,
            } => AuthorizationError::from_auth_error(error, state.clone())
                .to_redirect_url(redirect_uri)
                .ok(),
        }
    }
}
