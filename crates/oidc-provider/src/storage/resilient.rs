//! Bounded, retrying wrapper around a storage backend.
//!
//! Every call runs under `storage.operation_timeout`. Failures the backend
//! reports as [`AuthError::StorageUnavailable`] were not applied and are
//! retried up to `storage.max_attempts` with linear backoff. A timeout leaves
//! the outcome unknown, so it is retried only for operations that can safely
//! run twice; the compare-and-swap transitions give up immediately. When the
//! attempts run out the last error is returned and surfaces as `server_error`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AuthRequestStorage, CleanupReport, JtiStorage, RedeemOutcome, RotateOutcome, Storage,
    TokenStorage, TransitionOutcome,
};
use crate::config::StorageConfig;
use crate::types::{AuthorizationCode, AuthorizationRequest, TokenRecord};
use crate::{AuthError, AuthResult};

/// Whether an operation may be repeated after a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Idempotency {
    /// Repeating the call has the same effect as running it once.
    Idempotent,
    /// A conditional transition whose first attempt may have been applied.
    CompareAndSwap,
}

/// Storage wrapper adding timeouts and bounded retries.
#[derive(Debug, Clone)]
pub struct ResilientStorage<S> {
    inner: S,
    operation_timeout: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl<S: Storage> ResilientStorage<S> {
    /// Wraps `inner` with the bounds from `config`.
    pub fn new(inner: S, config: &StorageConfig) -> Self {
        Self {
            inner,
            operation_timeout: config.operation_timeout,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff,
        }
    }

    /// Returns the wrapped backend.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        idempotency: Idempotency,
        mut f: F,
    ) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.operation_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(AuthError::storage_timeout(operation)),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retryable = err.is_transient()
                || (matches!(err, AuthError::StorageTimeout { .. })
                    && idempotency == Idempotency::Idempotent);

            if !retryable || attempt >= self.max_attempts {
                tracing::error!(
                    operation,
                    attempt,
                    error = %err,
                    "Storage operation failed"
                );
                return Err(err);
            }

            tracing::warn!(
                operation,
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "Storage operation failed, retrying"
            );
            tokio::time::sleep(self.retry_backoff * attempt).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl<S: Storage> AuthRequestStorage for ResilientStorage<S> {
    async fn create_auth_request(&self, request: &AuthorizationRequest) -> AuthResult<()> {
        self.call("create_auth_request", Idempotency::Idempotent, move || {
            self.inner.create_auth_request(request)
        })
        .await
    }

    async fn find_auth_request(&self, id: Uuid) -> AuthResult<Option<AuthorizationRequest>> {
        self.call("find_auth_request", Idempotency::Idempotent, move || {
            self.inner.find_auth_request(id)
        })
        .await
    }

    async fn complete_auth_request(
        &self,
        id: Uuid,
        subject: &str,
        now: OffsetDateTime,
    ) -> AuthResult<TransitionOutcome> {
        self.call(
            "complete_auth_request",
            Idempotency::CompareAndSwap,
            move || self.inner.complete_auth_request(id, subject, now),
        )
        .await
    }

    async fn deny_auth_request(
        &self,
        id: Uuid,
        now: OffsetDateTime,
    ) -> AuthResult<TransitionOutcome> {
        self.call("deny_auth_request", Idempotency::CompareAndSwap, move || {
            self.inner.deny_auth_request(id, now)
        })
        .await
    }

    async fn issue_code(
        &self,
        request_id: Uuid,
        code: &AuthorizationCode,
        now: OffsetDateTime,
    ) -> AuthResult<TransitionOutcome> {
        self.call("issue_code", Idempotency::CompareAndSwap, move || {
            self.inner.issue_code(request_id, code, now)
        })
        .await
    }

    async fn redeem_code(&self, code_hash: &str, now: OffsetDateTime) -> AuthResult<RedeemOutcome> {
        self.call("redeem_code", Idempotency::CompareAndSwap, move || {
            self.inner.redeem_code(code_hash, now)
        })
        .await
    }
}

#[async_trait]
impl<S: Storage> TokenStorage for ResilientStorage<S> {
    async fn store_token(&self, record: &TokenRecord) -> AuthResult<()> {
        self.call("store_token", Idempotency::Idempotent, move || {
            self.inner.store_token(record)
        })
        .await
    }

    async fn find_refresh_token(&self, token_hash: &str) -> AuthResult<Option<TokenRecord>> {
        self.call("find_refresh_token", Idempotency::Idempotent, move || {
            self.inner.find_refresh_token(token_hash)
        })
        .await
    }

    async fn find_access_token(&self, jti: &str) -> AuthResult<Option<TokenRecord>> {
        self.call("find_access_token", Idempotency::Idempotent, move || {
            self.inner.find_access_token(jti)
        })
        .await
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<RotateOutcome> {
        self.call(
            "rotate_refresh_token",
            Idempotency::CompareAndSwap,
            move || self.inner.rotate_refresh_token(old_hash, new_hash, now),
        )
        .await
    }

    async fn revoke_token_family(&self, family_id: Uuid) -> AuthResult<u64> {
        self.call("revoke_token_family", Idempotency::Idempotent, move || {
            self.inner.revoke_token_family(family_id)
        })
        .await
    }
}

#[async_trait]
impl<S: Storage> JtiStorage for ResilientStorage<S> {
    async fn mark_jti_used(&self, jti: &str, expires_at: OffsetDateTime) -> AuthResult<bool> {
        self.call("mark_jti_used", Idempotency::CompareAndSwap, move || {
            self.inner.mark_jti_used(jti, expires_at)
        })
        .await
    }
}

#[async_trait]
impl<S: Storage> Storage for ResilientStorage<S> {
    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<CleanupReport> {
        self.call("cleanup_expired", Idempotency::Idempotent, move || {
            self.inner.cleanup_expired(now)
        })
        .await
    }
}
