//! The assembled authorization server.
//!
//! [`Provider`] owns the process-wide pieces (configuration, client
//! registry, storage handle, signing key) and the services built on them.
//! Everything is immutable after construction and shared through `Arc`.

use std::sync::Arc;

use crate::AuthResult;
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::oauth::client_auth::{ClientAuthenticator, ClientCredentials};
use crate::oauth::service::AuthorizationService;
use crate::oauth::token::{TokenRequest, TokenResponse};
use crate::registry::ClientRegistry;
use crate::storage::{InMemoryStorage, ResilientStorage, Storage};
use crate::token::jwt::{JwtService, SigningKeyPair};
use crate::token::service::TokenService;
use crate::types::{Client, GrantType};

/// OpenID Connect provider.
pub struct Provider {
    config: Arc<ProviderConfig>,
    registry: ClientRegistry,
    storage: Arc<dyn Storage>,
    jwt_service: Arc<JwtService>,
    authorization: AuthorizationService,
    client_authenticator: ClientAuthenticator,
    tokens: TokenService,
}

impl Provider {
    /// Builds a provider on `storage`, loading or generating the signing key
    /// from `config.signing`.
    ///
    /// `storage` is wrapped in [`ResilientStorage`] using `config.storage`.
    ///
    /// # Errors
    ///
    /// `Configuration` if the configuration, a client registration, or the
    /// signing key is invalid.
    pub fn new<S: Storage + 'static>(
        config: ProviderConfig,
        clients: impl IntoIterator<Item = Client>,
        storage: S,
    ) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let signing_key = SigningKeyPair::from_config(&config.signing)
            .map_err(|e| AuthError::configuration(format!("Signing key: {}", e)))?;
        let registry = ClientRegistry::new(clients)
            .map_err(|e| AuthError::configuration(format!("Client registration: {}", e)))?;
        let storage: Arc<dyn Storage> = Arc::new(ResilientStorage::new(storage, &config.storage));

        Ok(Self::from_parts(config, registry, storage, signing_key))
    }

    /// Builds a provider backed by [`InMemoryStorage`].
    ///
    /// # Errors
    ///
    /// See [`Provider::new`].
    pub fn in_memory(
        config: ProviderConfig,
        clients: impl IntoIterator<Item = Client>,
    ) -> AuthResult<Self> {
        Self::new(config, clients, InMemoryStorage::new())
    }

    /// Assembles a provider from already validated parts.
    #[must_use]
    pub fn from_parts(
        config: ProviderConfig,
        registry: ClientRegistry,
        storage: Arc<dyn Storage>,
        signing_key: SigningKeyPair,
    ) -> Self {
        let config = Arc::new(config);
        let jwt_service = Arc::new(JwtService::new(signing_key, config.issuer.clone()));

        tracing::info!(
            issuer = %config.issuer,
            clients = registry.len(),
            algorithm = %jwt_service.algorithm(),
            kid = %jwt_service.current_kid(),
            "OpenID provider initialized"
        );
        tracing::debug!(
            client_ids = ?registry.client_ids().collect::<Vec<_>>(),
            "Registered clients"
        );

        Self {
            authorization: AuthorizationService::new(
                config.clone(),
                registry.clone(),
                storage.clone(),
            ),
            client_authenticator: ClientAuthenticator::new(registry.clone(), &config),
            tokens: TokenService::new(config.clone(), jwt_service.clone(), storage.clone()),
            config,
            registry,
            storage,
            jwt_service,
        }
    }

    /// Handles a token endpoint request: authenticates the client and runs
    /// the requested grant.
    ///
    /// # Errors
    ///
    /// `InvalidClient` for failed client authentication, otherwise the
    /// grant's errors.
    pub async fn token(
        &self,
        authorization_header: Option<&str>,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        tracing::debug!(
            grant_type = %request.grant_type,
            client_id = ?request.client_id,
            "Processing token request"
        );

        let credentials = ClientCredentials::extract(authorization_header, request)?;
        let authenticated = self
            .client_authenticator
            .authenticate(&credentials, self.storage.as_ref())
            .await?;
        let client = authenticated.client.as_ref();

        match GrantType::parse(&request.grant_type) {
            Some(GrantType::AuthorizationCode) => self.tokens.exchange_code(request, client).await,
            Some(GrantType::RefreshToken) => self.tokens.refresh(request, client).await,
            None => {
                tracing::warn!(grant_type = %request.grant_type, "Unsupported grant type");
                Err(AuthError::unsupported_grant_type(&request.grant_type))
            }
        }
    }

    /// Provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Registered clients.
    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Storage handle, including the resilience wrapper.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Signing keys.
    #[must_use]
    pub fn jwt_service(&self) -> &Arc<JwtService> {
        &self.jwt_service
    }

    /// Authorization endpoint and login UI operations.
    #[must_use]
    pub fn authorization(&self) -> &AuthorizationService {
        &self.authorization
    }

    /// Token minting and validation.
    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::oauth::authorize::AuthorizationParams;
    use crate::oauth::service::tests::{native_client, web_client};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn hs256_config() -> ProviderConfig {
        let mut config = ProviderConfig::default();
        config.signing.algorithm = "HS256".to_string();
        config.signing.crypto_key = Some("00".repeat(32));
        config
    }

    #[tokio::test]
    async fn test_full_code_flow() {
        let provider = Provider::in_memory(hs256_config(), vec![web_client()]).unwrap();

        let pending = provider
            .authorization()
            .authorize(AuthorizationParams {
                response_type: Some("code".to_string()),
                client_id: Some("web".to_string()),
                redirect_uri: Some("https://app/cb".to_string()),
                scope: Some("openid".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let redirect = provider
            .authorization()
            .complete_authorization(pending.request_id, "alice")
            .await
            .unwrap();
        let code = url::Url::parse(&redirect)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let request = TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: Some(code),
            redirect_uri: Some("https://app/cb".to_string()),
            ..Default::default()
        };
        let basic = format!("Basic {}", STANDARD.encode("web:s3cr3t"));
        let response = provider.token(Some(&basic), &request).await.unwrap();
        assert!(response.id_token.is_some());

        // Wrong secret never reaches the grant
        let bad = format!("Basic {}", STANDARD.encode("web:wrong"));
        let err = provider.token(Some(&bad), &request).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");
    }

    #[test]
    fn test_out_of_range_client_lifetime_rejected() {
        let mut client = web_client();
        client.access_token_lifetime = Some(i64::MAX);
        let err = Provider::in_memory(hs256_config(), vec![client]).err().unwrap();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let provider = Provider::in_memory(hs256_config(), vec![native_client()]).unwrap();
        let request = TokenRequest {
            grant_type: "client_credentials".to_string(),
            client_id: Some("native".to_string()),
            ..Default::default()
        };
        let err = provider.token(None, &request).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_grant_type");
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let mut config = hs256_config();
        config.issuer = "not a url".to_string();
        assert!(matches!(
            Provider::in_memory(config, vec![]),
            Err(AuthError::Configuration { .. })
        ));

        let mut duplicate = web_client();
        duplicate.name = "again".to_string();
        assert!(Provider::in_memory(hs256_config(), vec![web_client(), duplicate]).is_err());
    }
}
