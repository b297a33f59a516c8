//! OAuth 2.0 client registration types.
//!
//! Clients are registered once at startup and never change afterwards.

use std::fmt;

use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};

use crate::config::MAX_LIFETIME;

// =============================================================================
// Client Type
// =============================================================================

/// Confidentiality of a client (RFC 6749 Section 2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Can keep a credential secret (web servers, backend services).
    Confidential,
    /// Cannot keep a credential secret (native and browser apps).
    #[serde(alias = "native")]
    Public,
}

// =============================================================================
// Token Endpoint Auth Method
// =============================================================================

/// How a client proves its identity at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// No credential, public clients relying on PKCE.
    None,
    /// Secret in the HTTP Basic `Authorization` header.
    ClientSecretBasic,
    /// Secret in the `client_secret` form field.
    ClientSecretPost,
    /// Signed JWT assertion verified against the client's registered keys.
    PrivateKeyJwt,
}

impl TokenEndpointAuthMethod {
    /// Returns the registered metadata value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::PrivateKeyJwt => "private_key_jwt",
        }
    }

    /// Returns `true` for the methods that present the shared secret.
    #[must_use]
    pub fn uses_secret(&self) -> bool {
        matches!(self, Self::ClientSecretBasic | Self::ClientSecretPost)
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types served by the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Refresh Token flow.
    RefreshToken,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }

    /// Parses a `grant_type` parameter value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Client
// =============================================================================

/// A registered OAuth 2.0 / OpenID Connect client.
#[derive(Clone, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier.
    pub client_id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Confidential or public.
    pub client_type: ClientType,

    /// Shared secret for `client_secret_basic` / `client_secret_post`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Exact-match redirect URIs.
    pub redirect_uris: Vec<String>,

    /// Token endpoint authentication methods the client may use.
    pub auth_methods: Vec<TokenEndpointAuthMethod>,

    /// Grant types the client may use.
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<GrantType>,

    /// Scopes the client may request. Empty means every scope the provider supports.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Public keys for `private_key_jwt` and signed request objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<JwkSet>,

    /// Access token lifetime override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_lifetime: Option<i64>,
}

fn default_grant_types() -> Vec<GrantType> {
    vec![GrantType::AuthorizationCode, GrantType::RefreshToken]
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("name", &self.name)
            .field("client_type", &self.client_type)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_uris", &self.redirect_uris)
            .field("auth_methods", &self.auth_methods)
            .field("grant_types", &self.grant_types)
            .field("scopes", &self.scopes)
            .field("jwks", &self.jwks.as_ref().map(|set| set.keys.len()))
            .field("access_token_lifetime", &self.access_token_lifetime)
            .finish()
    }
}

impl Client {
    /// Validates the registration.
    ///
    /// # Errors
    ///
    /// Returns the first rule the registration violates.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.redirect_uris.is_empty() {
            return Err(ClientValidationError::NoRedirectUris);
        }
        for uri in &self.redirect_uris {
            let parsed = url::Url::parse(uri)
                .map_err(|_| ClientValidationError::InvalidRedirectUri(uri.clone()))?;
            if parsed.fragment().is_some() {
                return Err(ClientValidationError::InvalidRedirectUri(uri.clone()));
            }
        }

        if self.auth_methods.is_empty() {
            return Err(ClientValidationError::NoAuthMethods);
        }
        if self.grant_types.is_empty() {
            return Err(ClientValidationError::NoGrantTypes);
        }

        match self.client_type {
            ClientType::Public => {
                if self.client_secret.is_some() {
                    return Err(ClientValidationError::PublicClientWithSecret);
                }
                if let Some(method) = self
                    .auth_methods
                    .iter()
                    .find(|m| **m != TokenEndpointAuthMethod::None)
                {
                    return Err(ClientValidationError::MethodNotAllowed {
                        method: *method,
                        client_type: self.client_type,
                    });
                }
            }
            ClientType::Confidential => {
                if self.auth_methods.contains(&TokenEndpointAuthMethod::None) {
                    return Err(ClientValidationError::MethodNotAllowed {
                        method: TokenEndpointAuthMethod::None,
                        client_type: self.client_type,
                    });
                }
                let needs_secret = self.auth_methods.iter().any(|m| m.uses_secret());
                if needs_secret && self.client_secret.as_deref().is_none_or(str::is_empty) {
                    return Err(ClientValidationError::MissingSecret);
                }
            }
        }

        if self
            .auth_methods
            .contains(&TokenEndpointAuthMethod::PrivateKeyJwt)
            && self.jwks.as_ref().is_none_or(|set| set.keys.is_empty())
        {
            return Err(ClientValidationError::MissingKeys);
        }

        if let Some(secs) = self.access_token_lifetime
            && !(1..=MAX_LIFETIME.as_secs() as i64).contains(&secs)
        {
            return Err(ClientValidationError::InvalidAccessTokenLifetime(secs));
        }

        Ok(())
    }

    /// Returns `true` for public clients.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_type == ClientType::Public
    }

    /// Checks the redirect URI by exact string comparison.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    /// Checks whether the client registered the given auth method.
    #[must_use]
    pub fn supports_auth_method(&self, method: TokenEndpointAuthMethod) -> bool {
        self.auth_methods.contains(&method)
    }

    /// Checks whether the client may use the given grant type.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Checks the scope against the client's list, falling back to `supported`
    /// when the client does not restrict scopes.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str, supported: &[String]) -> bool {
        if self.scopes.is_empty() {
            supported.iter().any(|s| s == scope)
        } else {
            self.scopes.iter().any(|s| s == scope)
        }
    }
}

/// Client registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    /// Client ID cannot be empty.
    #[error("Client ID cannot be empty")]
    EmptyClientId,

    /// At least one redirect URI is required.
    #[error("At least one redirect URI is required")]
    NoRedirectUris,

    /// Redirect URIs must be absolute and carry no fragment.
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// At least one auth method is required.
    #[error("At least one token endpoint auth method is required")]
    NoAuthMethods,

    /// At least one grant type is required.
    #[error("At least one grant type is required")]
    NoGrantTypes,

    /// Public clients cannot hold a secret.
    #[error("Public clients cannot have a client secret")]
    PublicClientWithSecret,

    /// The auth method does not fit the client type.
    #[error("Auth method {method} is not allowed for {client_type:?} clients")]
    MethodNotAllowed {
        /// The offending method.
        method: TokenEndpointAuthMethod,
        /// The client's type.
        client_type: ClientType,
    },

    /// Secret-based methods require a secret.
    #[error("Client secret is required for client_secret_basic and client_secret_post")]
    MissingSecret,

    /// `private_key_jwt` requires registered keys.
    #[error("private_key_jwt requires a JWK set")]
    MissingKeys,

    /// Lifetime override outside `1..=MAX_LIFETIME` seconds.
    #[error("access_token_lifetime {0}s is out of range")]
    InvalidAccessTokenLifetime(i64),

    /// Two registrations share an ID.
    #[error("Duplicate client ID: {0}")]
    DuplicateClientId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_client() -> Client {
        Client {
            client_id: "web".to_string(),
            name: "Web App".to_string(),
            client_type: ClientType::Confidential,
            client_secret: Some("s3cr3t".to_string()),
            redirect_uris: vec!["https://app/cb".to_string()],
            auth_methods: vec![
                TokenEndpointAuthMethod::ClientSecretBasic,
                TokenEndpointAuthMethod::ClientSecretPost,
            ],
            grant_types: default_grant_types(),
            scopes: vec![],
            jwks: None,
            access_token_lifetime: None,
        }
    }

    fn native_client() -> Client {
        Client {
            client_id: "native".to_string(),
            name: "Native App".to_string(),
            client_type: ClientType::Public,
            client_secret: None,
            redirect_uris: vec!["http://127.0.0.1/cb".to_string()],
            auth_methods: vec![TokenEndpointAuthMethod::None],
            grant_types: default_grant_types(),
            scopes: vec!["openid".to_string()],
            jwks: None,
            access_token_lifetime: None,
        }
    }

    #[test]
    fn test_valid_clients() {
        assert!(web_client().validate().is_ok());
        assert!(native_client().validate().is_ok());
    }

    #[test]
    fn test_redirect_uri_rules() {
        let mut client = web_client();
        client.redirect_uris = vec![];
        assert_eq!(client.validate(), Err(ClientValidationError::NoRedirectUris));

        client.redirect_uris = vec!["/relative".to_string()];
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::InvalidRedirectUri(_))
        ));

        client.redirect_uris = vec!["https://app/cb#frag".to_string()];
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::InvalidRedirectUri(_))
        ));
    }

    #[test]
    fn test_public_client_rules() {
        let mut client = native_client();
        client.client_secret = Some("oops".to_string());
        assert_eq!(
            client.validate(),
            Err(ClientValidationError::PublicClientWithSecret)
        );

        let mut client = native_client();
        client.auth_methods = vec![TokenEndpointAuthMethod::ClientSecretPost];
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::MethodNotAllowed { .. })
        ));
    }

    #[test]
    fn test_confidential_client_rules() {
        let mut client = web_client();
        client.client_secret = None;
        assert_eq!(client.validate(), Err(ClientValidationError::MissingSecret));

        let mut client = web_client();
        client.auth_methods = vec![TokenEndpointAuthMethod::PrivateKeyJwt];
        client.client_secret = None;
        assert_eq!(client.validate(), Err(ClientValidationError::MissingKeys));

        let mut client = web_client();
        client.auth_methods.push(TokenEndpointAuthMethod::None);
        assert!(client.validate().is_err());
    }

    #[test]
    fn test_access_token_lifetime_bounds() {
        let mut client = web_client();
        client.access_token_lifetime = Some(900);
        assert!(client.validate().is_ok());

        for secs in [0, -1, i64::MAX] {
            client.access_token_lifetime = Some(secs);
            assert_eq!(
                client.validate(),
                Err(ClientValidationError::InvalidAccessTokenLifetime(secs))
            );
        }
    }

    #[test]
    fn test_exact_redirect_match() {
        let client = web_client();
        assert!(client.is_redirect_uri_allowed("https://app/cb"));
        assert!(!client.is_redirect_uri_allowed("https://app/cb/"));
        assert!(!client.is_redirect_uri_allowed("https://app/cb?x=1"));
        assert!(!client.is_redirect_uri_allowed("https://app"));
    }

    #[test]
    fn test_scope_fallback() {
        let supported = vec!["openid".to_string(), "profile".to_string()];
        let client = web_client();
        assert!(client.is_scope_allowed("profile", &supported));
        assert!(!client.is_scope_allowed("admin", &supported));

        let client = native_client();
        assert!(client.is_scope_allowed("openid", &supported));
        assert!(!client.is_scope_allowed("profile", &supported));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let output = format!("{:?}", web_client());
        assert!(!output.contains("s3cr3t"));
        assert!(output.contains("[REDACTED]"));
    }

    #[test]
    fn test_deserialize_native_alias() {
        let json = r#"{
            "client_id": "native",
            "client_type": "native",
            "redirect_uris": ["http://127.0.0.1/cb"],
            "auth_methods": ["none"]
        }"#;
        let client: Client = serde_json::from_str(json).unwrap();
        assert!(client.is_public());
        assert_eq!(client.grant_types, default_grant_types());
    }
}
