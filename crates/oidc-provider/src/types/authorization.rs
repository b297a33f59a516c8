//! Persisted authorization state.
//!
//! An [`AuthorizationRequest`] moves through [`AuthRequestStatus`] one
//! storage write at a time:
//!
//! ```text
//! pending --(login UI attaches subject)--> authenticated --(code issued)--> consumed
//! ```
//!
//! The [`AuthorizationCode`] issued at the last step is redeemable once.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::oauth::PkceChallenge;

/// Lifecycle state of an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequestStatus {
    /// Validated, waiting for the login UI.
    Pending,
    /// Subject attached, code not yet issued.
    Authenticated,
    /// A code has been issued from this request.
    Consumed,
}

impl AuthRequestStatus {
    /// Returns the status name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authenticated => "authenticated",
            Self::Consumed => "consumed",
        }
    }
}

/// A validated authorization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Opaque identifier handed to the login UI. Also the token family id.
    pub id: Uuid,

    /// Requesting client.
    pub client_id: String,

    /// Always `code`.
    pub response_type: String,

    /// Requested scopes, deduplicated in request order.
    pub scopes: Vec<String>,

    /// Registered redirect URI the request was made with.
    pub redirect_uri: String,

    /// Client state, echoed on the redirect back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// OIDC nonce, echoed in the ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// PKCE challenge, if one was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<PkceChallenge>,

    /// When the request was accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,

    /// When a pending request is abandoned.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Authenticated end-user, set by the login UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// When the end-user authenticated, emitted as `auth_time`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub authenticated_at: Option<OffsetDateTime>,

    /// Current lifecycle state.
    pub status: AuthRequestStatus,
}

impl AuthorizationRequest {
    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the request carries the `openid` scope.
    #[must_use]
    pub fn is_openid(&self) -> bool {
        self.scopes.iter().any(|s| s == "openid")
    }

    /// Space separated scope string.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// An issued authorization code.
///
/// Only the SHA-256 hash of the code is kept; the plaintext goes to the
/// client in the redirect and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// SHA-256 hash of the code value (hex).
    pub code_hash: String,

    /// Request the code was issued from.
    pub authorization_request_id: Uuid,

    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// Absolute expiry, checked at redemption.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Set once by the single successful redemption.
    pub used: bool,
}

impl AuthorizationCode {
    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}
