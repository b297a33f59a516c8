//! Storage contract for authorization state and issued tokens.
//!
//! The protocol components never hold state between HTTP round trips; every
//! step reloads what it needs from storage and every transition is a single
//! atomic write. Implementations shared by several server instances must make
//! the compare-and-swap operations ([`AuthRequestStorage::complete_auth_request`],
//! [`AuthRequestStorage::issue_code`], [`AuthRequestStorage::redeem_code`],
//! [`TokenStorage::rotate_refresh_token`], [`JtiStorage::mark_jti_used`])
//! linearizable in the backing store, for example with a conditional update:
//!
//! ```sql
//! UPDATE authorization_codes
//! SET used = true
//! WHERE code_hash = $1 AND used = false
//! RETURNING *
//! ```
//!
//! Implementations report temporary backend failures as
//! [`AuthError::StorageUnavailable`](crate::AuthError::StorageUnavailable) only
//! when the operation was not applied; [`ResilientStorage`] retries those.

pub mod memory;
pub mod resilient;

pub use memory::InMemoryStorage;
pub use resilient::ResilientStorage;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::{AuthorizationCode, AuthorizationRequest, TokenRecord};

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a status transition on an authorization request.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The transition was applied; holds the updated request.
    Applied(AuthorizationRequest),
    /// The request exists but was not in the expected state.
    WrongState(AuthorizationRequest),
    /// The request has expired.
    Expired,
    /// No such request.
    NotFound,
}

/// Result of redeeming an authorization code.
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    /// First redemption; the code is now used. Holds the originating request.
    Redeemed(AuthorizationRequest),
    /// The code exists but is past its expiry.
    Expired,
    /// The code was already redeemed. Reuse signals a leaked code.
    AlreadyUsed {
        /// Originating request, which is also the token family id.
        authorization_request_id: Uuid,
    },
    /// No such code.
    Unknown,
}

/// Result of rotating a refresh token.
#[derive(Debug, Clone)]
pub enum RotateOutcome {
    /// The old token is revoked and the new one stored.
    Rotated {
        /// The presented token, now revoked.
        previous: TokenRecord,
        /// The replacement.
        current: TokenRecord,
    },
    /// The presented token was already rotated or revoked.
    Reused {
        /// Family of the reused token.
        family_id: Uuid,
    },
    /// The presented token has expired.
    Expired,
    /// No such token.
    Unknown,
}

/// Counts of entries purged by [`Storage::cleanup_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Expired authorization requests.
    pub auth_requests: u64,
    /// Expired authorization codes.
    pub codes: u64,
    /// Expired access and refresh tokens.
    pub tokens: u64,
    /// Expired assertion ids.
    pub jtis: u64,
}

impl CleanupReport {
    /// Total number of purged entries.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.auth_requests + self.codes + self.tokens + self.jtis
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Authorization requests and codes.
#[async_trait]
pub trait AuthRequestStorage: Send + Sync {
    /// Persists a new request in `pending` state.
    async fn create_auth_request(&self, request: &AuthorizationRequest) -> AuthResult<()>;

    /// Loads a request regardless of its state.
    async fn find_auth_request(&self, id: Uuid) -> AuthResult<Option<AuthorizationRequest>>;

    /// `pending` → `authenticated`, attaching the subject and `authenticated_at`.
    async fn complete_auth_request(
        &self,
        id: Uuid,
        subject: &str,
        now: OffsetDateTime,
    ) -> AuthResult<TransitionOutcome>;

    /// Removes a `pending` request the end-user declined.
    async fn deny_auth_request(&self, id: Uuid, now: OffsetDateTime) -> AuthResult<TransitionOutcome>;

    /// `authenticated` → `consumed`, storing `code` in the same step.
    async fn issue_code(
        &self,
        request_id: Uuid,
        code: &AuthorizationCode,
        now: OffsetDateTime,
    ) -> AuthResult<TransitionOutcome>;

    /// Marks the code used if it is unused and unexpired, in one atomic step.
    async fn redeem_code(&self, code_hash: &str, now: OffsetDateTime) -> AuthResult<RedeemOutcome>;
}

/// Access and refresh token records.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Records an issued token.
    async fn store_token(&self, record: &TokenRecord) -> AuthResult<()>;

    /// Loads a refresh token by value hash.
    async fn find_refresh_token(&self, token_hash: &str) -> AuthResult<Option<TokenRecord>>;

    /// Loads an access token by `jti`.
    async fn find_access_token(&self, jti: &str) -> AuthResult<Option<TokenRecord>>;

    /// Revokes the refresh token identified by `old_hash` and stores its
    /// replacement under `new_hash`, atomically.
    ///
    /// The replacement inherits family, subject, client, scopes, `auth_time`
    /// and `expires_at` from the old record and records it in `rotated_from`.
    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<RotateOutcome>;

    /// Revokes every token of a family. Returns the number newly revoked.
    async fn revoke_token_family(&self, family_id: Uuid) -> AuthResult<u64>;
}

/// Single-use client assertion ids.
#[async_trait]
pub trait JtiStorage: Send + Sync {
    /// Records `jti` until `expires_at`. Returns `false` if it was already recorded.
    async fn mark_jti_used(&self, jti: &str, expires_at: OffsetDateTime) -> AuthResult<bool>;
}

/// Everything the provider needs from a storage backend.
#[async_trait]
pub trait Storage: AuthRequestStorage + TokenStorage + JtiStorage {
    /// Purges expired requests, codes, tokens and assertion ids.
    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<CleanupReport>;
}
