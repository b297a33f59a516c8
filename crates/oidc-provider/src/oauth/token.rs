//! Token endpoint request and response types.
//!
//! # Supported Grant Types
//!
//! - `authorization_code` - Exchange authorization code for tokens
//! - `refresh_token` - Refresh an access token

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Token request parameters.
///
/// Different fields are required depending on the `grant_type`:
///
/// - `authorization_code`: code, redirect_uri, code_verifier (when a challenge was sent)
/// - `refresh_token`: refresh_token, (optional) scope
///
/// # Client Authentication
///
/// Clients authenticate using one of:
/// - HTTP Basic Auth header (not in this struct)
/// - `client_id` + `client_secret` in body
/// - `client_assertion_type` + `client_assertion` (JWT)
/// - `client_id` only (public clients)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    #[serde(default)]
    pub grant_type: String,

    /// Authorization code (for authorization_code grant).
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI (must match authorization request).
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier (for authorization_code grant).
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// Client ID (for public clients or client_secret_post).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (for client_secret_post authentication).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Client assertion type (for private_key_jwt).
    #[serde(default)]
    pub client_assertion_type: Option<String>,

    /// Client assertion JWT (for private_key_jwt authentication).
    #[serde(default)]
    pub client_assertion: Option<String>,

    /// Refresh token (for refresh_token grant).
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Requested scope (for refresh_token grant, must be subset of original).
    #[serde(default)]
    pub scope: Option<String>,
}

/// Successful token response.
///
/// ```json
/// {
///   "access_token": "eyJhbG...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "openid offline_access",
///   "refresh_token": "Qk9X...",
///   "id_token": "eyJhbG..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token (JWT).
    pub access_token: String,

    /// Token type, always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes (space-separated).
    pub scope: String,

    /// Refresh token (if offline_access scope was granted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (if openid scope was granted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Creates a new token response with required fields.
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
            id_token: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }

    /// Sets the ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: String) -> Self {
        self.id_token = Some(token);
        self
    }
}

/// Token endpoint error body (RFC 6749 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    /// Error code.
    pub error: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&AuthError> for TokenErrorResponse {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.oauth_error_code().to_string(),
            error_description: Some(err.public_description()),
        }
    }
}
