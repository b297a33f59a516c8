//! Token service for generating and validating tokens.
//!
//! Handles the two grants of the token endpoint:
//!
//! - `authorization_code`: redeems a code exactly once
//! - `refresh_token`: rotates the presented refresh token
//!
//! Every token minted from one authorization request shares a family id
//! (the request id). Reuse of a redeemed code or a rotated refresh token is
//! treated as a leak and, depending on policy, revokes the whole family.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::oauth::pkce::PkceVerifier;
use crate::oauth::service::parse_scopes;
use crate::oauth::token::{TokenRequest, TokenResponse};
use crate::storage::{RedeemOutcome, RotateOutcome, Storage};
use crate::token::jwt::{AccessTokenClaims, IdTokenClaims, JwtService};
use crate::types::{
    Client, GrantType, TokenKind, TokenRecord, expires_after, generate_token, hash_token,
};

/// Scope that makes a grant eligible for refresh tokens.
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// The validated basis for minting tokens. Never persisted.
#[derive(Debug, Clone)]
pub struct Grant {
    /// Token family, the originating authorization request id.
    pub family_id: Uuid,
    /// End-user.
    pub subject: String,
    /// Client the grant belongs to.
    pub client_id: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// When the end-user authenticated.
    pub auth_time: Option<OffsetDateTime>,
    /// Nonce to echo in the ID token.
    pub nonce: Option<String>,
}

impl Grant {
    fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Token service for generating and managing OAuth tokens.
pub struct TokenService {
    config: Arc<ProviderConfig>,
    jwt_service: Arc<JwtService>,
    storage: Arc<dyn Storage>,
}

impl TokenService {
    /// Creates a new token service.
    #[must_use]
    pub fn new(
        config: Arc<ProviderConfig>,
        jwt_service: Arc<JwtService>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            jwt_service,
            storage,
        }
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// - `UnsupportedGrantType` / `UnauthorizedClient` for the wrong grant
    /// - `InvalidRequest` if `code` or `redirect_uri` is missing
    /// - `InvalidGrant` if the code is unknown, expired, already used,
    ///   issued to another client, bound to another redirect URI, or the
    ///   PKCE verifier does not match
    ///
    /// # Security
    ///
    /// - The code is consumed atomically before any other check
    /// - A reused code revokes the tokens issued from it when
    ///   `oauth.revoke_tokens_on_code_reuse` is set
    pub async fn exchange_code(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> AuthResult<TokenResponse> {
        // 1. Validate grant type
        if request.grant_type != GrantType::AuthorizationCode.as_str() {
            return Err(AuthError::unsupported_grant_type(&request.grant_type));
        }
        if !client.is_grant_type_allowed(GrantType::AuthorizationCode) {
            return Err(AuthError::unauthorized_client(
                "Client not authorized for authorization_code grant",
            ));
        }

        // 2. Extract required fields
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("Missing code parameter"))?;
        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("Missing redirect_uri parameter"))?;

        // 3. Redeem (atomic one-time use)
        let now = OffsetDateTime::now_utc();
        let auth_request = match self.storage.redeem_code(&hash_token(code), now).await? {
            RedeemOutcome::Redeemed(auth_request) => auth_request,
            RedeemOutcome::Expired => {
                return Err(AuthError::invalid_grant("Authorization code expired"));
            }
            RedeemOutcome::AlreadyUsed {
                authorization_request_id,
            } => {
                tracing::warn!(
                    client_id = %client.client_id,
                    family_id = %authorization_request_id,
                    "Authorization code reused"
                );
                if self.config.oauth.revoke_tokens_on_code_reuse {
                    let revoked = self
                        .storage
                        .revoke_token_family(authorization_request_id)
                        .await?;
                    tracing::warn!(
                        family_id = %authorization_request_id,
                        revoked,
                        "Revoked tokens issued from reused code"
                    );
                }
                return Err(AuthError::invalid_grant("Authorization code already used"));
            }
            RedeemOutcome::Unknown => {
                return Err(AuthError::invalid_grant("Invalid authorization code"));
            }
        };

        // 4. Validate client ID matches
        if auth_request.client_id != client.client_id {
            tracing::warn!(
                client_id = %client.client_id,
                "Authorization code presented by a different client"
            );
            return Err(AuthError::invalid_grant(
                "Authorization code was issued to a different client",
            ));
        }

        // 5. Validate redirect URI matches exactly
        if auth_request.redirect_uri != redirect_uri {
            return Err(AuthError::invalid_grant(
                "Redirect URI does not match authorization request",
            ));
        }

        // 6. Verify PKCE
        match (&auth_request.code_challenge, request.code_verifier.as_deref()) {
            (Some(challenge), Some(verifier)) => {
                let verifier = PkceVerifier::new(verifier.to_string())
                    .map_err(|e| AuthError::invalid_grant(format!("Invalid PKCE verifier: {}", e)))?;
                challenge.verify(&verifier).map_err(|_| {
                    tracing::warn!(client_id = %client.client_id, "PKCE verification failed");
                    AuthError::invalid_grant("PKCE verification failed")
                })?;
            }
            (Some(_), None) => {
                return Err(AuthError::invalid_grant("Missing code_verifier parameter"));
            }
            (None, Some(_)) => {
                return Err(AuthError::invalid_grant(
                    "code_verifier sent but no code_challenge was registered",
                ));
            }
            (None, None) => {}
        }

        let subject = auth_request
            .subject
            .clone()
            .ok_or_else(|| AuthError::internal("Redeemed request has no subject"))?;

        let grant = Grant {
            family_id: auth_request.id,
            subject,
            client_id: client.client_id.clone(),
            scopes: auth_request.scopes.clone(),
            auth_time: auth_request.authenticated_at,
            nonce: auth_request.nonce.clone(),
        };

        // 7. Generate tokens
        let mut response = self.mint(&grant, client, now).await?;
        if self.refresh_allowed(&grant, client) {
            let refresh_token = self.generate_refresh_token(&grant, now).await?;
            response = response.with_refresh_token(refresh_token);
        }

        tracing::info!(
            client_id = %client.client_id,
            family_id = %grant.family_id,
            scope = %response.scope,
            "Tokens issued for authorization code"
        );

        Ok(response)
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// The requested `scope` may narrow the grant for this access token;
    /// the refresh token keeps the original scopes. With rotation enabled
    /// the presented token is invalidated and a new one returned.
    ///
    /// # Errors
    ///
    /// - `UnsupportedGrantType` / `UnauthorizedClient` for the wrong grant
    /// - `InvalidRequest` if `refresh_token` is missing
    /// - `InvalidGrant` if the token is unknown, expired, revoked, already
    ///   rotated or issued to another client
    /// - `InvalidScope` if the requested scope exceeds the original grant
    pub async fn refresh(
        &self,
        request: &TokenRequest,
        client: &Client,
    ) -> AuthResult<TokenResponse> {
        // 1. Validate grant type
        if request.grant_type != GrantType::RefreshToken.as_str() {
            return Err(AuthError::unsupported_grant_type(&request.grant_type));
        }
        if !client.is_grant_type_allowed(GrantType::RefreshToken) {
            return Err(AuthError::unauthorized_client(
                "Client not authorized for refresh_token grant",
            ));
        }

        // 2. Lookup
        let presented = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("Missing refresh_token parameter"))?;
        let token_hash = hash_token(presented);
        let stored = self
            .storage
            .find_refresh_token(&token_hash)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid refresh token"))?;

        if stored.client_id != client.client_id {
            tracing::warn!(
                client_id = %client.client_id,
                "Refresh token presented by a different client"
            );
            return Err(AuthError::invalid_grant(
                "Refresh token was issued to a different client",
            ));
        }

        // 3. Scope can be narrowed, never widened
        let scopes = determine_refresh_scopes(request.scope.as_deref(), &stored.scopes)?;

        // 4. Rotate or reuse
        let now = OffsetDateTime::now_utc();
        let (record, new_refresh_token) = if self.config.oauth.refresh_token_rotation {
            let new_value = generate_token();
            match self
                .storage
                .rotate_refresh_token(&token_hash, &hash_token(&new_value), now)
                .await?
            {
                RotateOutcome::Rotated { current, .. } => (current, Some(new_value)),
                RotateOutcome::Reused { family_id } => {
                    return Err(self.refresh_reused(client, family_id).await?);
                }
                RotateOutcome::Expired => {
                    return Err(AuthError::invalid_grant("Refresh token has expired"));
                }
                RotateOutcome::Unknown => {
                    return Err(AuthError::invalid_grant("Invalid refresh token"));
                }
            }
        } else {
            if stored.revoked {
                return Err(AuthError::invalid_grant("Refresh token has been revoked"));
            }
            if stored.is_expired_at(now) {
                return Err(AuthError::invalid_grant("Refresh token has expired"));
            }
            (stored, None)
        };

        let grant = Grant {
            family_id: record.family_id,
            subject: record.subject.clone(),
            client_id: record.client_id.clone(),
            scopes,
            auth_time: record.auth_time,
            nonce: None,
        };

        // 5. Build response
        let mut response = self.mint(&grant, client, now).await?;
        if let Some(token) = new_refresh_token {
            response = response.with_refresh_token(token);
        }

        tracing::info!(
            client_id = %client.client_id,
            family_id = %grant.family_id,
            rotated = response.refresh_token.is_some(),
            "Tokens issued for refresh token"
        );

        Ok(response)
    }

    /// Handles a refresh token that was already rotated or revoked.
    ///
    /// Returns the error to report; only storage failures are `Err`.
    async fn refresh_reused(&self, client: &Client, family_id: Uuid) -> AuthResult<AuthError> {
        tracing::warn!(
            client_id = %client.client_id,
            family_id = %family_id,
            "Refresh token reused"
        );
        if self.config.oauth.revoke_family_on_refresh_reuse {
            let revoked = self.storage.revoke_token_family(family_id).await?;
            tracing::warn!(family_id = %family_id, revoked, "Revoked refresh token family");
        }
        Ok(AuthError::invalid_grant("Refresh token already used"))
    }

    /// Issues the access token and, for `openid` grants, the ID token.
    async fn mint(
        &self,
        grant: &Grant,
        client: &Client,
        now: OffsetDateTime,
    ) -> AuthResult<TokenResponse> {
        let access_lifetime = client
            .access_token_lifetime
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(self.config.oauth.access_token_lifetime);

        let access_token = self
            .generate_access_token(grant, access_lifetime, now)
            .await?;
        let mut response = TokenResponse::new(
            access_token,
            access_lifetime.as_secs(),
            grant.scopes.join(" "),
        );

        if grant.has_scope("openid") {
            let id_token = self.generate_id_token(grant, now)?;
            response = response.with_id_token(id_token);
        }

        Ok(response)
    }

    fn refresh_allowed(&self, grant: &Grant, client: &Client) -> bool {
        grant.has_scope(OFFLINE_ACCESS_SCOPE) && client.is_grant_type_allowed(GrantType::RefreshToken)
    }

    /// Encodes an access token and records its `jti`.
    async fn generate_access_token(
        &self,
        grant: &Grant,
        lifetime: Duration,
        now: OffsetDateTime,
    ) -> AuthResult<String> {
        let expires_at = expires_after(now, lifetime)?;
        let jti = Uuid::new_v4().to_string();

        let claims = AccessTokenClaims {
            iss: self.config.issuer.clone(),
            sub: grant.subject.clone(),
            aud: vec![grant.client_id.clone()],
            exp: expires_at.unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: jti.clone(),
            scope: grant.scopes.join(" "),
            client_id: grant.client_id.clone(),
        };

        let access_token = self
            .jwt_service
            .encode(&claims)
            .map_err(|e| AuthError::internal(format!("Failed to encode access token: {}", e)))?;

        self.storage
            .store_token(&TokenRecord {
                id: Uuid::new_v4(),
                kind: TokenKind::Access,
                token_key: jti,
                family_id: grant.family_id,
                subject: grant.subject.clone(),
                client_id: grant.client_id.clone(),
                scopes: grant.scopes.clone(),
                auth_time: grant.auth_time,
                issued_at: now,
                expires_at,
                rotated_from: None,
                revoked: false,
            })
            .await?;

        Ok(access_token)
    }

    /// Generates and stores a refresh token. Returns the plaintext value.
    async fn generate_refresh_token(&self, grant: &Grant, now: OffsetDateTime) -> AuthResult<String> {
        let expires_at = expires_after(now, self.config.oauth.refresh_token_lifetime)?;
        let value = generate_token();

        self.storage
            .store_token(&TokenRecord {
                id: Uuid::new_v4(),
                kind: TokenKind::Refresh,
                token_key: hash_token(&value),
                family_id: grant.family_id,
                subject: grant.subject.clone(),
                client_id: grant.client_id.clone(),
                scopes: grant.scopes.clone(),
                auth_time: grant.auth_time,
                issued_at: now,
                expires_at,
                rotated_from: None,
                revoked: false,
            })
            .await?;

        Ok(value)
    }

    /// Generates an ID token (OpenID Connect).
    fn generate_id_token(&self, grant: &Grant, now: OffsetDateTime) -> AuthResult<String> {
        let expires_at = expires_after(now, self.config.oauth.id_token_lifetime)?;
        let claims = IdTokenClaims {
            iss: self.config.issuer.clone(),
            sub: grant.subject.clone(),
            aud: grant.client_id.clone(),
            exp: expires_at.unix_timestamp(),
            iat: now.unix_timestamp(),
            auth_time: grant.auth_time.map(OffsetDateTime::unix_timestamp),
            nonce: grant.nonce.clone(),
        };

        self.jwt_service
            .encode(&claims)
            .map_err(|e| AuthError::internal(format!("Failed to encode ID token: {}", e)))
    }

    /// Decodes an access token and checks that it has not been revoked.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for bad signatures, expired, unknown or revoked tokens.
    pub async fn validate_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let claims = self
            .jwt_service
            .decode::<AccessTokenClaims>(token)
            .map_err(|e| AuthError::invalid_grant(format!("Invalid access token: {}", e)))?
            .claims;

        let record = self
            .storage
            .find_access_token(&claims.jti)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Unknown access token"))?;

        if !record.is_active_at(OffsetDateTime::now_utc()) {
            return Err(AuthError::invalid_grant("Access token has been revoked"));
        }

        Ok(claims)
    }

    /// Gets the JWT service reference.
    #[must_use]
    pub fn jwt_service(&self) -> &Arc<JwtService> {
        &self.jwt_service
    }
}

/// Scopes for a refreshed access token: the requested subset, or the
/// original grant when none is requested.
fn determine_refresh_scopes(requested: Option<&str>, original: &[String]) -> AuthResult<Vec<String>> {
    let Some(requested) = requested else {
        return Ok(original.to_vec());
    };

    let scopes = parse_scopes(requested);
    if scopes.is_empty() {
        return Ok(original.to_vec());
    }
    if let Some(extra) = scopes.iter().find(|s| !original.contains(s)) {
        return Err(AuthError::invalid_scope(format!(
            "Scope '{}' exceeds the original grant",
            extra
        )));
    }
    Ok(scopes)
}
