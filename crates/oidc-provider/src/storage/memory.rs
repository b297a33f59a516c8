//! In-memory reference storage.
//!
//! Each keyspace is a [`DashMap`]; every transition runs while holding the
//! entry's shard lock, which makes it atomic within the process. This backend
//! suits tests and single-instance deployments. Several instances behind a
//! load balancer need a shared transactional store instead.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AuthRequestStorage, CleanupReport, JtiStorage, RedeemOutcome, RotateOutcome, Storage,
    TokenStorage, TransitionOutcome,
};
use crate::AuthResult;
use crate::types::{
    AuthRequestStatus, AuthorizationCode, AuthorizationRequest, TokenKind, TokenRecord,
};

/// In-memory implementation of [`Storage`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    auth_requests: Arc<DashMap<Uuid, AuthorizationRequest>>,
    codes: Arc<DashMap<String, AuthorizationCode>>,
    refresh_tokens: Arc<DashMap<String, TokenRecord>>,
    access_tokens: Arc<DashMap<String, TokenRecord>>,
    revoked_families: Arc<DashMap<Uuid, OffsetDateTime>>,
    jtis: Arc<DashMap<String, OffsetDateTime>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored authorization requests, in any state.
    #[must_use]
    pub fn auth_request_count(&self) -> usize {
        self.auth_requests.len()
    }

    fn tokens_for(&self, kind: TokenKind) -> &DashMap<String, TokenRecord> {
        match kind {
            TokenKind::Access => &self.access_tokens,
            TokenKind::Refresh => &self.refresh_tokens,
        }
    }

    // A token stored concurrently with the revocation of its family is
    // caught either by the revocation sweep or by this check.
    fn insert_token(&self, record: TokenRecord) {
        let map = self.tokens_for(record.kind);
        let key = record.token_key.clone();
        let family_id = record.family_id;
        map.insert(key.clone(), record);
        if self.revoked_families.contains_key(&family_id)
            && let Some(mut stored) = map.get_mut(&key)
        {
            stored.revoked = true;
        }
    }
}

#[async_trait]
impl AuthRequestStorage for InMemoryStorage {
    async fn create_auth_request(&self, request: &AuthorizationRequest) -> AuthResult<()> {
        self.auth_requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn find_auth_request(&self, id: Uuid) -> AuthResult<Option<AuthorizationRequest>> {
        Ok(self.auth_requests.get(&id).map(|r| r.value().clone()))
    }

    async fn complete_auth_request(
        &self,
        id: Uuid,
        subject: &str,
        now: OffsetDateTime,
    ) -> AuthResult<TransitionOutcome> {
        let Some(mut request) = self.auth_requests.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if request.is_expired_at(now) {
            return Ok(TransitionOutcome::Expired);
        }
        if request.status != AuthRequestStatus::Pending {
            return Ok(TransitionOutcome::WrongState(request.clone()));
        }
        request.subject = Some(subject.to_string());
        request.authenticated_at = Some(now);
        request.status = AuthRequestStatus::Authenticated;
        Ok(TransitionOutcome::Applied(request.clone()))
    }

    async fn deny_auth_request(
        &self,
        id: Uuid,
        now: OffsetDateTime,
    ) -> AuthResult<TransitionOutcome> {
        match self.auth_requests.entry(id) {
            Entry::Vacant(_) => Ok(TransitionOutcome::NotFound),
            Entry::Occupied(entry) => {
                if entry.get().is_expired_at(now) {
                    return Ok(TransitionOutcome::Expired);
                }
                if entry.get().status != AuthRequestStatus::Pending {
                    return Ok(TransitionOutcome::WrongState(entry.get().clone()));
                }
                Ok(TransitionOutcome::Applied(entry.remove()))
            }
        }
    }

    async fn issue_code(
        &self,
        request_id: Uuid,
        code: &AuthorizationCode,
        now: OffsetDateTime,
    ) -> AuthResult<TransitionOutcome> {
        let Some(mut request) = self.auth_requests.get_mut(&request_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if request.is_expired_at(now) {
            return Ok(TransitionOutcome::Expired);
        }
        if request.status != AuthRequestStatus::Authenticated {
            return Ok(TransitionOutcome::WrongState(request.clone()));
        }
        request.status = AuthRequestStatus::Consumed;
        // The request must outlive its code so redemption can load it.
        if request.expires_at < code.expires_at {
            request.expires_at = code.expires_at;
        }
        self.codes.insert(code.code_hash.clone(), code.clone());
        Ok(TransitionOutcome::Applied(request.clone()))
    }

    async fn redeem_code(&self, code_hash: &str, now: OffsetDateTime) -> AuthResult<RedeemOutcome> {
        let request_id = {
            let Some(mut code) = self.codes.get_mut(code_hash) else {
                return Ok(RedeemOutcome::Unknown);
            };
            if code.used {
                return Ok(RedeemOutcome::AlreadyUsed {
                    authorization_request_id: code.authorization_request_id,
                });
            }
            if code.is_expired_at(now) {
                return Ok(RedeemOutcome::Expired);
            }
            code.used = true;
            code.authorization_request_id
        };

        Ok(match self.auth_requests.get(&request_id) {
            Some(request) => RedeemOutcome::Redeemed(request.clone()),
            None => RedeemOutcome::Unknown,
        })
    }
}

#[async_trait]
impl TokenStorage for InMemoryStorage {
    async fn store_token(&self, record: &TokenRecord) -> AuthResult<()> {
        self.insert_token(record.clone());
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> AuthResult<Option<TokenRecord>> {
        Ok(self.refresh_tokens.get(token_hash).map(|r| r.value().clone()))
    }

    async fn find_access_token(&self, jti: &str) -> AuthResult<Option<TokenRecord>> {
        Ok(self.access_tokens.get(jti).map(|r| r.value().clone()))
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<RotateOutcome> {
        let previous = {
            let Some(mut old) = self.refresh_tokens.get_mut(old_hash) else {
                return Ok(RotateOutcome::Unknown);
            };
            if old.revoked {
                return Ok(RotateOutcome::Reused {
                    family_id: old.family_id,
                });
            }
            if old.is_expired_at(now) {
                return Ok(RotateOutcome::Expired);
            }
            old.revoked = true;
            old.clone()
        };

        let current = TokenRecord {
            id: Uuid::new_v4(),
            kind: TokenKind::Refresh,
            token_key: new_hash.to_string(),
            family_id: previous.family_id,
            subject: previous.subject.clone(),
            client_id: previous.client_id.clone(),
            scopes: previous.scopes.clone(),
            auth_time: previous.auth_time,
            issued_at: now,
            expires_at: previous.expires_at,
            rotated_from: Some(previous.id),
            revoked: false,
        };
        self.insert_token(current.clone());

        Ok(RotateOutcome::Rotated { previous, current })
    }

    async fn revoke_token_family(&self, family_id: Uuid) -> AuthResult<u64> {
        self.revoked_families
            .insert(family_id, OffsetDateTime::now_utc());

        let mut revoked = 0;
        for map in [&self.refresh_tokens, &self.access_tokens] {
            for mut entry in map.iter_mut() {
                if entry.family_id == family_id && !entry.revoked {
                    entry.revoked = true;
                    revoked += 1;
                }
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl JtiStorage for InMemoryStorage {
    async fn mark_jti_used(&self, jti: &str, expires_at: OffsetDateTime) -> AuthResult<bool> {
        match self.jtis.entry(jti.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn cleanup_expired(&self, now: OffsetDateTime) -> AuthResult<CleanupReport> {
        fn purge<K, V>(map: &DashMap<K, V>, keep: impl Fn(&V) -> bool) -> u64
        where
            K: Eq + std::hash::Hash,
        {
            let before = map.len();
            map.retain(|_, v| keep(v));
            before.saturating_sub(map.len()) as u64
        }

        let report = CleanupReport {
            auth_requests: purge(&self.auth_requests, |r| !r.is_expired_at(now)),
            codes: purge(&self.codes, |c| !c.is_expired_at(now)),
            tokens: purge(&self.refresh_tokens, |t| !t.is_expired_at(now))
                + purge(&self.access_tokens, |t| !t.is_expired_at(now)),
            jtis: purge(&self.jtis, |exp| *exp > now),
        };

        // Family markers are only needed while members may still be stored.
        self.revoked_families.retain(|family_id, _| {
            self.refresh_tokens
                .iter()
                .any(|t| t.family_id == *family_id)
                || self
                    .access_tokens
                    .iter()
                    .any(|t| t.family_id == *family_id)
        });

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hash_token;
    use time::Duration;
    use tokio::sync::Barrier;

    fn pending_request(now: OffsetDateTime) -> AuthorizationRequest {
        AuthorizationRequest {
            id: Uuid::new_v4(),
            client_id: "web".to_string(),
            response_type: "code".to_string(),
            scopes: vec!["openid".to_string()],
            redirect_uri: "https://app/cb".to_string(),
            state: Some("xyz".to_string()),
            nonce: None,
            code_challenge: None,
            requested_at: now,
            expires_at: now + Duration::minutes(30),
            subject: None,
            authenticated_at: None,
            status: AuthRequestStatus::Pending,
        }
    }

    fn code_for(request_id: Uuid, value: &str, now: OffsetDateTime) -> AuthorizationCode {
        AuthorizationCode {
            code_hash: hash_token(value),
            authorization_request_id: request_id,
            issued_at: now,
            expires_at: now + Duration::seconds(60),
            used: false,
        }
    }

    fn refresh_record(family_id: Uuid, value: &str, now: OffsetDateTime) -> TokenRecord {
        TokenRecord {
            id: Uuid::new_v4(),
            kind: TokenKind::Refresh,
            token_key: hash_token(value),
            family_id,
            subject: "alice".to_string(),
            client_id: "web".to_string(),
            scopes: vec!["openid".to_string(), "offline_access".to_string()],
            auth_time: Some(now),
            issued_at: now,
            expires_at: now + Duration::days(30),
            rotated_from: None,
            revoked: false,
        }
    }

    async fn issued(storage: &InMemoryStorage, now: OffsetDateTime) -> (Uuid, String) {
        let request = pending_request(now);
        storage.create_auth_request(&request).await.unwrap();
        storage
            .complete_auth_request(request.id, "alice", now)
            .await
            .unwrap();
        let code = code_for(request.id, "the-code", now);
        let outcome = storage.issue_code(request.id, &code, now).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));
        (request.id, code.code_hash)
    }

    #[tokio::test]
    async fn test_state_machine() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let request = pending_request(now);
        storage.create_auth_request(&request).await.unwrap();

        // Code cannot be issued before login.
        let code = code_for(request.id, "early", now);
        let outcome = storage.issue_code(request.id, &code, now).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::WrongState(_)));

        let outcome = storage
            .complete_auth_request(request.id, "alice", now)
            .await
            .unwrap();
        let TransitionOutcome::Applied(updated) = outcome else {
            panic!("expected transition to authenticated");
        };
        assert_eq!(updated.status, AuthRequestStatus::Authenticated);
        assert_eq!(updated.subject.as_deref(), Some("alice"));

        // Second completion is rejected.
        let outcome = storage
            .complete_auth_request(request.id, "mallory", now)
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::WrongState(_)));

        let outcome = storage.issue_code(request.id, &code, now).await.unwrap();
        let TransitionOutcome::Applied(updated) = outcome else {
            panic!("expected transition to consumed");
        };
        assert_eq!(updated.status, AuthRequestStatus::Consumed);

        // A consumed request cannot mint another code.
        let again = code_for(request.id, "again", now);
        let outcome = storage.issue_code(request.id, &again, now).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::WrongState(_)));
    }

    #[tokio::test]
    async fn test_expired_request_cannot_complete() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let request = pending_request(now);
        storage.create_auth_request(&request).await.unwrap();

        let later = now + Duration::minutes(31);
        let outcome = storage
            .complete_auth_request(request.id, "alice", later)
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Expired));

        let outcome = storage
            .complete_auth_request(Uuid::new_v4(), "alice", now)
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_deny_removes_pending_request() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let request = pending_request(now);
        storage.create_auth_request(&request).await.unwrap();

        let outcome = storage.deny_auth_request(request.id, now).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));
        assert!(storage.find_auth_request(request.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redeem_once() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let (request_id, code_hash) = issued(&storage, now).await;

        let outcome = storage.redeem_code(&code_hash, now).await.unwrap();
        let RedeemOutcome::Redeemed(request) = outcome else {
            panic!("expected redemption");
        };
        assert_eq!(request.id, request_id);
        assert_eq!(request.subject.as_deref(), Some("alice"));

        let outcome = storage.redeem_code(&code_hash, now).await.unwrap();
        assert!(matches!(
            outcome,
            RedeemOutcome::AlreadyUsed { authorization_request_id } if authorization_request_id == request_id
        ));

        let outcome = storage.redeem_code("nope", now).await.unwrap();
        assert!(matches!(outcome, RedeemOutcome::Unknown));
    }

    #[tokio::test]
    async fn test_redeem_expired() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let (_, code_hash) = issued(&storage, now).await;

        let later = now + Duration::seconds(61);
        let outcome = storage.redeem_code(&code_hash, later).await.unwrap();
        assert!(matches!(outcome, RedeemOutcome::Expired));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redeem_single_winner() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let (_, code_hash) = issued(&storage, now).await;

        let barrier = Arc::new(Barrier::new(16));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let storage = storage.clone();
            let code_hash = code_hash.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                storage.redeem_code(&code_hash, now).await.unwrap()
            }));
        }

        let mut redeemed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                RedeemOutcome::Redeemed(_) => redeemed += 1,
                outcome => assert!(matches!(outcome, RedeemOutcome::AlreadyUsed { .. }), "{outcome:?}"),
            }
        }
        assert_eq!(redeemed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotation_single_winner() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let family = Uuid::new_v4();
        storage
            .store_token(&refresh_record(family, "r1", now))
            .await
            .unwrap();

        let barrier = Arc::new(Barrier::new(16));
        let mut handles = Vec::new();
        for i in 0..16 {
            let storage = storage.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                storage
                    .rotate_refresh_token(&hash_token("r1"), &hash_token(&format!("r2-{i}")), now)
                    .await
                    .unwrap()
            }));
        }

        let mut rotated = 0;
        for handle in handles {
            match handle.await.unwrap() {
                RotateOutcome::Rotated { .. } => rotated += 1,
                RotateOutcome::Reused { family_id } => assert_eq!(family_id, family),
                outcome => panic!("unexpected outcome: {outcome:?}"),
            }
        }
        assert_eq!(rotated, 1);
    }

    #[tokio::test]
    async fn test_rotation_chain() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let family = Uuid::new_v4();
        let r1 = refresh_record(family, "r1", now);
        storage.store_token(&r1).await.unwrap();

        let outcome = storage
            .rotate_refresh_token(&hash_token("r1"), &hash_token("r2"), now)
            .await
            .unwrap();
        let RotateOutcome::Rotated { previous, current } = outcome else {
            panic!("expected rotation");
        };
        assert_eq!(previous.id, r1.id);
        assert_eq!(current.rotated_from, Some(r1.id));
        assert_eq!(current.family_id, family);
        assert_eq!(current.expires_at, r1.expires_at);

        let old = storage
            .find_refresh_token(&hash_token("r1"))
            .await
            .unwrap()
            .unwrap();
        assert!(old.revoked);

        let outcome = storage
            .rotate_refresh_token(&hash_token("r1"), &hash_token("r3"), now)
            .await
            .unwrap();
        assert!(matches!(outcome, RotateOutcome::Reused { family_id } if family_id == family));
    }

    #[tokio::test]
    async fn test_revoke_family() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let family = Uuid::new_v4();
        let other = Uuid::new_v4();
        storage
            .store_token(&refresh_record(family, "a", now))
            .await
            .unwrap();
        storage
            .store_token(&refresh_record(other, "b", now))
            .await
            .unwrap();

        assert_eq!(storage.revoke_token_family(family).await.unwrap(), 1);
        assert!(
            storage
                .find_refresh_token(&hash_token("a"))
                .await
                .unwrap()
                .unwrap()
                .revoked
        );
        assert!(
            !storage
                .find_refresh_token(&hash_token("b"))
                .await
                .unwrap()
                .unwrap()
                .revoked
        );

        // Late members of a revoked family are stored revoked.
        storage
            .store_token(&refresh_record(family, "late", now))
            .await
            .unwrap();
        assert!(
            storage
                .find_refresh_token(&hash_token("late"))
                .await
                .unwrap()
                .unwrap()
                .revoked
        );
    }

    #[tokio::test]
    async fn test_jti_single_use() {
        let storage = InMemoryStorage::new();
        let exp = OffsetDateTime::now_utc() + Duration::minutes(5);
        assert!(storage.mark_jti_used("jti-1", exp).await.unwrap());
        assert!(!storage.mark_jti_used("jti-1", exp).await.unwrap());
        assert!(storage.mark_jti_used("jti-2", exp).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        let (_, _) = issued(&storage, now).await;
        storage
            .store_token(&refresh_record(Uuid::new_v4(), "r", now))
            .await
            .unwrap();
        storage
            .mark_jti_used("j", now + Duration::minutes(1))
            .await
            .unwrap();

        let report = storage.cleanup_expired(now).await.unwrap();
        assert_eq!(report.total(), 0);

        let report = storage
            .cleanup_expired(now + Duration::days(31))
            .await
            .unwrap();
        assert_eq!(report.auth_requests, 1);
        assert_eq!(report.codes, 1);
        assert_eq!(report.tokens, 1);
        assert_eq!(report.jtis, 1);
    }
}
