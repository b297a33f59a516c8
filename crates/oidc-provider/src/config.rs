//! Provider configuration.
//!
//! Every section deserializes with `#[serde(default)]`, so an empty TOML
//! table yields a working development provider. Durations use
//! `humantime` notation (`"60s"`, `"30m"`, `"30d"`).
//!
//! # Example (TOML)
//!
//! ```toml
//! [provider]
//! issuer = "https://login.example.com/"
//!
//! [provider.oauth]
//! authorization_code_lifetime = "60s"
//! revoke_family_on_refresh_reuse = true
//!
//! [provider.pkce]
//! allow_plain = false
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for every configured code, request and token lifetime.
pub const MAX_LIFETIME: Duration = Duration::from_secs(366 * 24 * 3600);

/// Root configuration of the authorization server core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Issuer identifier, emitted as `iss` and used as the base for endpoint URLs.
    pub issuer: String,

    /// Endpoint paths.
    pub endpoints: EndpointsConfig,

    /// Lifetimes and replay policy.
    pub oauth: OAuthConfig,

    /// PKCE policy.
    pub pkce: PkceConfig,

    /// `private_key_jwt` assertion limits.
    pub assertion: AssertionConfig,

    /// Token signing key.
    pub signing: SigningConfig,

    /// Storage call bounds and maintenance.
    pub storage: StorageConfig,

    /// Scopes advertised in discovery.
    pub scopes_supported: Vec<String>,

    /// UI locales advertised in discovery.
    pub ui_locales_supported: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:9998/".to_string(),
            endpoints: EndpointsConfig::default(),
            oauth: OAuthConfig::default(),
            pkce: PkceConfig::default(),
            assertion: AssertionConfig::default(),
            signing: SigningConfig::default(),
            storage: StorageConfig::default(),
            scopes_supported: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "phone".to_string(),
                "address".to_string(),
                "offline_access".to_string(),
            ],
            ui_locales_supported: vec!["en".to_string()],
        }
    }
}

/// Paths of the HTTP endpoints, relative to the issuer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Authorization endpoint.
    pub authorization: String,

    /// Token endpoint.
    pub token: String,

    /// JWK set endpoint.
    pub jwks: String,

    /// Login UI the browser is sent to after a valid authorization request.
    /// May be absolute or relative to the issuer.
    pub login_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            authorization: "/auth".to_string(),
            token: "/oauth/token".to_string(),
            jwks: "/keys".to_string(),
            login_url: "/login/username".to_string(),
        }
    }
}

/// Lifetimes and replay-detection policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// How long a pending authorization request waits for the login UI.
    #[serde(with = "humantime_serde")]
    pub authorization_request_lifetime: Duration,

    /// Access token lifetime, unless the client overrides it.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Refresh token lifetime. Rotation keeps the original expiry.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Issue a new refresh token on every refresh and invalidate the old one.
    pub refresh_token_rotation: bool,

    /// Revoke the whole token family when a rotated or revoked refresh
    /// token is presented again.
    pub revoke_family_on_refresh_reuse: bool,

    /// Revoke tokens issued from an authorization code when the code is
    /// redeemed a second time.
    pub revoke_tokens_on_code_reuse: bool,

    /// Accept signed request objects in the `request` parameter.
    pub request_object_supported: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(60),
            authorization_request_lifetime: Duration::from_secs(30 * 60),
            access_token_lifetime: Duration::from_secs(3600),
            id_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            refresh_token_rotation: true,
            revoke_family_on_refresh_reuse: true,
            revoke_tokens_on_code_reuse: true,
            request_object_supported: true,
        }
    }
}

/// PKCE policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PkceConfig {
    /// Public clients must send a code challenge.
    pub required_for_public_clients: bool,

    /// Confidential clients must send a code challenge.
    pub required_for_confidential_clients: bool,

    /// Accept the `plain` challenge method.
    pub allow_plain: bool,
}

impl Default for PkceConfig {
    fn default() -> Self {
        Self {
            required_for_public_clients: true,
            required_for_confidential_clients: false,
            allow_plain: false,
        }
    }
}

/// Limits applied to `private_key_jwt` client assertions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssertionConfig {
    /// Maximum distance of `exp` into the future.
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,

    /// Tolerated clock difference between client and server.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for AssertionConfig {
    fn default() -> Self {
        Self {
            max_lifetime: Duration::from_secs(300),
            clock_skew: Duration::from_secs(60),
        }
    }
}

/// Token signing configuration.
///
/// RSA and EC keys are read from PEM when both keys are given,
/// otherwise a key pair is generated at startup. HS256 uses `crypto_key`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm: "RS256", "RS384", "ES384" or "HS256".
    pub algorithm: String,

    /// Key id published in the JWK set and token headers.
    pub key_id: Option<String>,

    /// PEM encoded private key.
    pub private_key_pem: Option<String>,

    /// PEM encoded public key.
    pub public_key_pem: Option<String>,

    /// Hex encoded HMAC key for HS256, at least 32 bytes.
    pub crypto_key: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            key_id: None,
            private_key_pem: None,
            public_key_pem: None,
            crypto_key: None,
        }
    }
}

/// Storage call bounds and maintenance schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Deadline for a single storage call.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Attempts per storage operation, including the first.
    pub max_attempts: u32,

    /// Delay added per retry (linear backoff).
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Interval between purges of expired state.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(2),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl ProviderConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the issuer is not an absolute URL, an endpoint
    /// path does not start with `/`, a lifetime is zero, the signing algorithm
    /// is unknown or the storage bounds are zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }
        url::Url::parse(&self.issuer).map_err(|e| {
            ConfigError::InvalidValue(format!("issuer '{}' is not a URL: {}", self.issuer, e))
        })?;

        for (name, path) in [
            ("endpoints.authorization", &self.endpoints.authorization),
            ("endpoints.token", &self.endpoints.token),
            ("endpoints.jwks", &self.endpoints.jwks),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must start with '/', got '{}'",
                    name, path
                )));
            }
        }
        if self.endpoints.login_url.is_empty() {
            return Err(ConfigError::Missing("endpoints.login_url".to_string()));
        }

        for (name, lifetime) in [
            (
                "oauth.authorization_code_lifetime",
                self.oauth.authorization_code_lifetime,
            ),
            (
                "oauth.authorization_request_lifetime",
                self.oauth.authorization_request_lifetime,
            ),
            ("oauth.access_token_lifetime", self.oauth.access_token_lifetime),
            ("oauth.id_token_lifetime", self.oauth.id_token_lifetime),
            (
                "oauth.refresh_token_lifetime",
                self.oauth.refresh_token_lifetime,
            ),
        ] {
            if lifetime.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{} must be > 0", name)));
            }
            if lifetime > MAX_LIFETIME {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must not exceed {}s",
                    name,
                    MAX_LIFETIME.as_secs()
                )));
            }
        }

        match self.signing.algorithm.as_str() {
            "RS256" | "RS384" | "ES384" => {}
            "HS256" => {
                if let Some(key) = &self.signing.crypto_key {
                    let bytes = hex::decode(key).map_err(|_| {
                        ConfigError::InvalidValue("signing.crypto_key must be hex".to_string())
                    })?;
                    if bytes.len() < 32 {
                        return Err(ConfigError::InvalidValue(
                            "signing.crypto_key must be at least 32 bytes".to_string(),
                        ));
                    }
                }
            }
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{}'. Must be RS256, RS384, ES384, or HS256",
                    other
                )));
            }
        }

        if self.signing.private_key_pem.is_some() != self.signing.public_key_pem.is_some() {
            return Err(ConfigError::InvalidValue(
                "signing.private_key_pem and signing.public_key_pem must be set together"
                    .to_string(),
            ));
        }

        if self.storage.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "storage.max_attempts must be > 0".to_string(),
            ));
        }
        if self.storage.operation_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "storage.operation_timeout must be > 0".to_string(),
            ));
        }
        if self.storage.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "storage.cleanup_interval must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Issuer without a trailing slash.
    #[must_use]
    pub fn issuer_base(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    /// Absolute URL of an endpoint path.
    #[must_use]
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.issuer_base(), path)
    }

    /// Absolute URL of the authorization endpoint.
    #[must_use]
    pub fn authorization_endpoint(&self) -> String {
        self.endpoint_url(&self.endpoints.authorization)
    }

    /// Absolute URL of the token endpoint.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        self.endpoint_url(&self.endpoints.token)
    }

    /// Absolute URL of the JWK set.
    #[must_use]
    pub fn jwks_uri(&self) -> String {
        self.endpoint_url(&self.endpoints.jwks)
    }

    /// Absolute URL of the login UI.
    #[must_use]
    pub fn login_url(&self) -> String {
        let login = &self.endpoints.login_url;
        if login.starts_with("http://") || login.starts_with("https://") {
            login.clone()
        } else {
            self.endpoint_url(login)
        }
    }
}
