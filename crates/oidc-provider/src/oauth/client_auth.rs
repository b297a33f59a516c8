//! Client authentication for the token endpoint.
//!
//! # Authentication Methods
//!
//! - `none` - Public clients (client_id only, PKCE protects the code)
//! - `client_secret_basic` - HTTP Basic Auth with client_id:client_secret
//! - `client_secret_post` - client_id and client_secret in request body
//! - `private_key_jwt` - Client assertion JWT (RFC 7523)
//!
//! A request carries exactly one credential form. The form is picked from
//! what the request contains and must be one of the client's registered
//! `auth_methods`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;

use crate::AuthResult;
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::oauth::client_assertion::{
    ClientAssertionValidator, JWT_BEARER_ASSERTION_TYPE, extract_client_id_unverified,
};
use crate::oauth::token::TokenRequest;
use crate::registry::ClientRegistry;
use crate::storage::JtiStorage;
use crate::types::{Client, TokenEndpointAuthMethod};

/// Credentials presented at the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    /// HTTP Basic Auth header.
    Basic {
        /// Client identifier.
        client_id: String,
        /// Client secret.
        client_secret: String,
    },
    /// `client_id` and `client_secret` form fields.
    Post {
        /// Client identifier.
        client_id: String,
        /// Client secret.
        client_secret: String,
    },
    /// Signed JWT assertion.
    Assertion {
        /// Form `client_id`, optional for assertions.
        client_id: Option<String>,
        /// The assertion JWT.
        assertion: String,
    },
    /// Public client, identified only.
    Public {
        /// Client identifier.
        client_id: String,
    },
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("method", &self.method())
            .field("client_id", &self.client_id())
            .finish()
    }
}

impl ClientCredentials {
    /// Extracts credentials from the `Authorization` header and form body.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` when more than one credential form is present or
    ///   the assertion type is unsupported
    /// - `InvalidClient` when no credentials are present, the Basic header
    ///   is malformed, or its client_id contradicts the form `client_id`
    pub fn extract(authorization: Option<&str>, request: &TokenRequest) -> AuthResult<Self> {
        let basic = authorization
            .filter(|value| value.starts_with("Basic "))
            .map(parse_basic_auth)
            .transpose()?;

        let presented = usize::from(basic.is_some())
            + usize::from(request.client_secret.is_some())
            + usize::from(request.client_assertion.is_some());
        if presented > 1 {
            return Err(AuthError::invalid_request(
                "Multiple client authentication methods in one request",
            ));
        }

        if let Some((client_id, client_secret)) = basic {
            if let Some(ref form_id) = request.client_id
                && *form_id != client_id
            {
                return Err(AuthError::invalid_client(
                    "client_id does not match the Authorization header",
                ));
            }
            return Ok(Self::Basic {
                client_id,
                client_secret,
            });
        }

        if let Some(ref client_secret) = request.client_secret {
            let client_id = request.client_id.clone().ok_or_else(|| {
                AuthError::invalid_request("client_id is required with client_secret")
            })?;
            return Ok(Self::Post {
                client_id,
                client_secret: client_secret.clone(),
            });
        }

        if let Some(ref assertion) = request.client_assertion {
            if request.client_assertion_type.as_deref() != Some(JWT_BEARER_ASSERTION_TYPE) {
                return Err(AuthError::invalid_request(format!(
                    "client_assertion_type must be {}",
                    JWT_BEARER_ASSERTION_TYPE
                )));
            }
            return Ok(Self::Assertion {
                client_id: request.client_id.clone(),
                assertion: assertion.clone(),
            });
        }

        match request.client_id {
            Some(ref client_id) => Ok(Self::Public {
                client_id: client_id.clone(),
            }),
            None => Err(AuthError::invalid_client("Client authentication required")),
        }
    }

    /// The auth method these credentials correspond to.
    #[must_use]
    pub fn method(&self) -> TokenEndpointAuthMethod {
        match self {
            Self::Basic { .. } => TokenEndpointAuthMethod::ClientSecretBasic,
            Self::Post { .. } => TokenEndpointAuthMethod::ClientSecretPost,
            Self::Assertion { .. } => TokenEndpointAuthMethod::PrivateKeyJwt,
            Self::Public { .. } => TokenEndpointAuthMethod::None,
        }
    }

    /// The client_id carried outside of an assertion, if any.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::Basic { client_id, .. }
            | Self::Post { client_id, .. }
            | Self::Public { client_id } => Some(client_id),
            Self::Assertion { client_id, .. } => client_id.as_deref(),
        }
    }
}

/// Result of successful client authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    /// The authenticated client.
    pub client: Arc<Client>,

    /// The authentication method used.
    pub auth_method: TokenEndpointAuthMethod,
}

/// Authenticates clients against the registry.
pub struct ClientAuthenticator {
    registry: ClientRegistry,
    assertion_validator: ClientAssertionValidator,
}

impl ClientAuthenticator {
    /// Creates a new authenticator.
    #[must_use]
    pub fn new(registry: ClientRegistry, config: &ProviderConfig) -> Self {
        Self {
            registry,
            assertion_validator: ClientAssertionValidator::new(config),
        }
    }

    /// Authenticate a client from extracted credentials.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` if the client is unknown, did not register
    /// the presented method, or the credential does not verify.
    pub async fn authenticate<J: JtiStorage + ?Sized>(
        &self,
        credentials: &ClientCredentials,
        jti_storage: &J,
    ) -> AuthResult<AuthenticatedClient> {
        let client_id = match credentials {
            ClientCredentials::Assertion {
                client_id: None,
                assertion,
            } => extract_client_id_unverified(assertion)?,
            other => other.client_id().unwrap_or_default().to_string(),
        };

        let client = self.registry.get(&client_id).ok_or_else(|| {
            tracing::warn!(client_id = %client_id, "Unknown client at token endpoint");
            AuthError::invalid_client("Unknown client")
        })?;

        let method = credentials.method();
        if !client.supports_auth_method(method) {
            tracing::warn!(client_id = %client_id, method = %method, "Auth method not registered for client");
            return Err(AuthError::invalid_client(format!(
                "Client is not registered for {}",
                method
            )));
        }

        match credentials {
            ClientCredentials::Basic { client_secret, .. }
            | ClientCredentials::Post { client_secret, .. } => {
                verify_secret(&client, client_secret)?;
            }
            ClientCredentials::Assertion { assertion, .. } => {
                self.assertion_validator
                    .validate(assertion, &client, jti_storage)
                    .await?;
            }
            ClientCredentials::Public { .. } => {}
        }

        tracing::debug!(client_id = %client_id, method = %method, "Client authenticated");

        Ok(AuthenticatedClient {
            client,
            auth_method: method,
        })
    }
}

fn verify_secret(client: &Client, presented: &str) -> AuthResult<()> {
    let stored = client
        .client_secret
        .as_deref()
        .ok_or_else(|| AuthError::invalid_client("Client has no secret"))?;

    if bool::from(stored.as_bytes().ct_eq(presented.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!(client_id = %client.client_id, "Client secret mismatch");
        Err(AuthError::invalid_client("Invalid client credentials"))
    }
}

/// Parse HTTP Basic Auth header value.
///
/// Expects format: "Basic base64(client_id:client_secret)"
fn parse_basic_auth(header: &str) -> AuthResult<(String, String)> {
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| AuthError::invalid_client("Invalid Authorization header format"))?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::invalid_client("Invalid Base64 in Authorization header"))?;

    let decoded_str = String::from_utf8(decoded)
        .map_err(|_| AuthError::invalid_client("Invalid UTF-8 in Authorization header"))?;

    let (client_id, client_secret) = decoded_str
        .split_once(':')
        .ok_or_else(|| AuthError::invalid_client("Invalid Basic auth format"))?;

    if client_id.is_empty() {
        return Err(AuthError::invalid_client("Empty client_id in Basic auth"));
    }

    Ok((client_id.to_string(), client_secret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::client_assertion::tests::{client_key, sign};
    use crate::storage::InMemoryStorage;
    use crate::types::{ClientType, GrantType};
    use time::OffsetDateTime;

    fn basic(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", id, secret)))
    }

    fn confidential(id: &str, methods: Vec<TokenEndpointAuthMethod>) -> Client {
        Client {
            client_id: id.to_string(),
            name: id.to_string(),
            client_type: ClientType::Confidential,
            client_secret: Some("s3cr3t".to_string()),
            redirect_uris: vec!["https://app/cb".to_string()],
            auth_methods: methods,
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            scopes: vec![],
            jwks: None,
            access_token_lifetime: None,
        }
    }

    fn public(id: &str) -> Client {
        Client {
            client_id: id.to_string(),
            name: id.to_string(),
            client_type: ClientType::Public,
            client_secret: None,
            redirect_uris: vec!["http://localhost:3000/cb".to_string()],
            auth_methods: vec![TokenEndpointAuthMethod::None],
            grant_types: vec![GrantType::AuthorizationCode],
            scopes: vec![],
            jwks: None,
            access_token_lifetime: None,
        }
    }

    fn authenticator(clients: Vec<Client>) -> ClientAuthenticator {
        ClientAuthenticator::new(
            ClientRegistry::new(clients).unwrap(),
            &ProviderConfig::default(),
        )
    }

    fn form(client_id: Option<&str>, client_secret: Option<&str>) -> TokenRequest {
        TokenRequest {
            grant_type: "authorization_code".to_string(),
            client_id: client_id.map(String::from),
            client_secret: client_secret.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_basic_auth() {
        let (id, secret) = parse_basic_auth(&basic("web", "s3cr3t")).unwrap();
        assert_eq!(id, "web");
        assert_eq!(secret, "s3cr3t");

        assert!(parse_basic_auth("Basic !!!").is_err());
        assert!(parse_basic_auth(&format!("Basic {}", STANDARD.encode("nocolon"))).is_err());
    }

    #[test]
    fn test_extract_each_form() {
        let creds = ClientCredentials::extract(Some(&basic("web", "x")), &form(None, None)).unwrap();
        assert_eq!(creds.method(), TokenEndpointAuthMethod::ClientSecretBasic);

        let creds = ClientCredentials::extract(None, &form(Some("web"), Some("x"))).unwrap();
        assert_eq!(creds.method(), TokenEndpointAuthMethod::ClientSecretPost);

        let creds = ClientCredentials::extract(None, &form(Some("native"), None)).unwrap();
        assert_eq!(creds.method(), TokenEndpointAuthMethod::None);
        assert_eq!(creds.client_id(), Some("native"));
    }

    #[test]
    fn test_extract_rejects_multiple_forms() {
        let err = ClientCredentials::extract(Some(&basic("web", "x")), &form(Some("web"), Some("x")))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }

    #[test]
    fn test_extract_rejects_conflicting_client_id() {
        let err =
            ClientCredentials::extract(Some(&basic("web", "x")), &form(Some("other"), None)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));
    }

    #[test]
    fn test_extract_requires_some_identity() {
        let err = ClientCredentials::extract(None, &form(None, None)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));
    }

    #[test]
    fn test_extract_rejects_wrong_assertion_type() {
        let request = TokenRequest {
            client_assertion: Some("a.b.c".to_string()),
            client_assertion_type: Some("urn:other".to_string()),
            ..Default::default()
        };
        let err = ClientCredentials::extract(None, &request).unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_authenticate_secret_methods() {
        let auth = authenticator(vec![confidential(
            "web",
            vec![TokenEndpointAuthMethod::ClientSecretBasic],
        )]);
        let storage = InMemoryStorage::new();

        let ok = ClientCredentials::extract(Some(&basic("web", "s3cr3t")), &form(None, None)).unwrap();
        let authenticated = auth.authenticate(&ok, &storage).await.unwrap();
        assert_eq!(authenticated.client.client_id, "web");

        let wrong = ClientCredentials::extract(Some(&basic("web", "nope")), &form(None, None)).unwrap();
        assert!(auth.authenticate(&wrong, &storage).await.is_err());

        // Correct secret, but post is not registered
        let post = ClientCredentials::extract(None, &form(Some("web"), Some("s3cr3t"))).unwrap();
        let err = auth.authenticate(&post, &storage).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));
    }

    #[tokio::test]
    async fn test_confidential_client_cannot_skip_authentication() {
        let auth = authenticator(vec![confidential(
            "web",
            vec![TokenEndpointAuthMethod::ClientSecretBasic],
        )]);
        let creds = ClientCredentials::extract(None, &form(Some("web"), None)).unwrap();
        assert!(auth.authenticate(&creds, &InMemoryStorage::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_public_client() {
        let auth = authenticator(vec![public("native")]);
        let creds = ClientCredentials::extract(None, &form(Some("native"), None)).unwrap();
        let authenticated = auth
            .authenticate(&creds, &InMemoryStorage::new())
            .await
            .unwrap();
        assert_eq!(authenticated.auth_method, TokenEndpointAuthMethod::None);

        let unknown = ClientCredentials::extract(None, &form(Some("ghost"), None)).unwrap();
        assert!(auth.authenticate(&unknown, &InMemoryStorage::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_private_key_jwt() {
        let key = client_key("k1");
        let mut api = confidential("api", vec![TokenEndpointAuthMethod::PrivateKeyJwt]);
        api.client_secret = None;
        api.jwks = Some(key.jwks.clone());
        let auth = authenticator(vec![api]);

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let assertion = sign(
            &key,
            "k1",
            &serde_json::json!({
                "iss": "api", "sub": "api", "aud": "http://localhost:9998/oauth/token",
                "exp": now + 60, "jti": "one"
            }),
        );
        let request = TokenRequest {
            client_assertion: Some(assertion),
            client_assertion_type: Some(JWT_BEARER_ASSERTION_TYPE.to_string()),
            ..Default::default()
        };
        let creds = ClientCredentials::extract(None, &request).unwrap();
        let storage = InMemoryStorage::new();

        let authenticated = auth.authenticate(&creds, &storage).await.unwrap();
        assert_eq!(authenticated.client.client_id, "api");
        assert_eq!(
            authenticated.auth_method,
            TokenEndpointAuthMethod::PrivateKeyJwt
        );

        // Replay
        assert!(auth.authenticate(&creds, &storage).await.is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let creds = ClientCredentials::Basic {
            client_id: "web".to_string(),
            client_secret: "s3cr3t".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("s3cr3t"));
    }
}
