//! Issued token records.
//!
//! Access tokens are recorded by their `jti`, refresh tokens by the
//! SHA-256 hash of their value. Both carry the family id of the grant
//! they descend from so a compromised lineage can be revoked as a unit.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;

/// Kind of a recorded token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// JWT access token, keyed by `jti`.
    Access,
    /// Opaque refresh token, keyed by value hash.
    Refresh,
}

/// A token issued by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Record id. `rotated_from` points at another record's id.
    pub id: Uuid,

    /// Access or refresh.
    pub kind: TokenKind,

    /// Lookup key: `jti` for access tokens, value hash for refresh tokens.
    pub token_key: String,

    /// Grant lineage, the id of the originating authorization request.
    pub family_id: Uuid,

    /// End-user the token was issued for.
    pub subject: String,

    /// Client the token was issued to.
    pub client_id: String,

    /// Granted scopes.
    pub scopes: Vec<String>,

    /// When the end-user authenticated.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub auth_time: Option<OffsetDateTime>,

    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// Absolute expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Refresh token this one replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<Uuid>,

    /// Set on rotation and on family revocation.
    pub revoked: bool,
}

impl TokenRecord {
    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the token is neither expired nor revoked.
    #[must_use]
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }
}

/// Absolute expiry `lifetime` after `now`.
///
/// # Errors
///
/// `Configuration` when the expiry does not fit in an `OffsetDateTime`.
pub fn expires_after(now: OffsetDateTime, lifetime: Duration) -> AuthResult<OffsetDateTime> {
    time::Duration::try_from(lifetime)
        .ok()
        .and_then(|lifetime| now.checked_add(lifetime))
        .ok_or_else(|| {
            AuthError::configuration(format!(
                "Lifetime of {}s overflows the expiry timestamp",
                lifetime.as_secs()
            ))
        })
}

/// Hash a code or refresh token value using SHA-256 (hex).
#[must_use]
pub fn hash_token(value: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Generate a 256-bit random value encoded as base64url (43 characters).
#[must_use]
pub fn generate_token() -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_hash_token() {
        let hash = hash_token("test-token-value");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("test-token-value"));
        assert_ne!(hash, hash_token("different-token"));
    }

    #[test]
    fn test_generate_token_uniqueness() {
        let tokens: Vec<String> = (0..100).map(|_| generate_token()).collect();
        assert!(tokens.iter().all(|t| t.len() == 43));

        let mut unique = tokens.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(tokens.len(), unique.len());
    }

    #[test]
    fn test_expires_after() {
        let now = OffsetDateTime::now_utc();
        let expiry = expires_after(now, std::time::Duration::from_secs(60)).unwrap();
        assert_eq!(expiry, now + Duration::seconds(60));

        let err = expires_after(now, std::time::Duration::from_secs(i64::MAX as u64)).unwrap_err();
        assert!(err.is_server_error());
        assert!(expires_after(now, std::time::Duration::MAX).is_err());
    }

    #[test]
    fn test_active() {
        let now = OffsetDateTime::now_utc();
        let mut record = TokenRecord {
            id: Uuid::new_v4(),
            kind: TokenKind::Refresh,
            token_key: hash_token("r1"),
            family_id: Uuid::new_v4(),
            subject: "alice".to_string(),
            client_id: "web".to_string(),
            scopes: vec!["openid".to_string()],
            auth_time: Some(now),
            issued_at: now,
            expires_at: now + Duration::hours(1),
            rotated_from: None,
            revoked: false,
        };
        assert!(record.is_active_at(now));
        assert!(!record.is_active_at(now + Duration::hours(1)));

        record.revoked = true;
        assert!(!record.is_active_at(now));
    }
}
