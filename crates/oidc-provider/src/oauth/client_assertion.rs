//! JWT client assertions (`private_key_jwt`, RFC 7523).
//!
//! The assertion must contain:
//!
//! - `iss` and `sub`: the client_id
//! - `aud`: the issuer or the token endpoint URL
//! - `exp`: not further ahead than the configured maximum lifetime
//! - `jti`: unique, recorded in storage until `exp` to stop replays
//!
//! The signature is checked against the client's registered JWK set,
//! selecting the key by `kid` and `alg`.

use std::time::Duration;

use jsonwebtoken::jwk::{Jwk, JwkSet, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::storage::JtiStorage;
use crate::types::Client;

/// The only supported `client_assertion_type`.
pub const JWT_BEARER_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Claims of a client assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    /// Issuer, the client_id.
    pub iss: String,

    /// Subject, the client_id.
    pub sub: String,

    /// Audience, a single string or an array.
    pub aud: StringOrArray,

    /// Expiration time as Unix timestamp.
    pub exp: i64,

    /// JWT ID.
    pub jti: String,

    /// Issued at time as Unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Audience claim can be a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrArray {
    /// Single string audience.
    String(String),
    /// Array of audience strings.
    Array(Vec<String>),
}

impl StringOrArray {
    /// Checks if the audience contains the specified value.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::String(s) => s == value,
            Self::Array(arr) => arr.iter().any(|s| s == value),
        }
    }
}

/// Validates client assertions.
#[derive(Debug, Clone)]
pub struct ClientAssertionValidator {
    issuer: String,
    token_endpoint: String,
    max_lifetime: Duration,
    clock_skew: Duration,
}

impl ClientAssertionValidator {
    /// Creates a validator from the provider configuration.
    #[must_use]
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            token_endpoint: config.token_endpoint(),
            max_lifetime: config.assertion.max_lifetime,
            clock_skew: config.assertion.clock_skew,
        }
    }

    /// Validates an assertion presented by `client` and records its `jti`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` if the signature, claims or lifetime are
    /// wrong or the `jti` was seen before. Storage failures propagate.
    pub async fn validate<J: JtiStorage + ?Sized>(
        &self,
        assertion: &str,
        client: &Client,
        jti_storage: &J,
    ) -> AuthResult<ClientAssertionClaims> {
        // 1. Pick the verification key from the header
        let header = jsonwebtoken::decode_header(assertion)
            .map_err(|_| AuthError::invalid_client("Malformed client assertion"))?;
        if is_symmetric(header.alg) {
            return Err(AuthError::invalid_client(
                "private_key_jwt requires an asymmetric algorithm",
            ));
        }
        let jwks = client
            .jwks
            .as_ref()
            .ok_or_else(|| AuthError::invalid_client("Client has no registered keys"))?;
        let decoding_key = decoding_key_from_jwks(jwks, header.kid.as_deref(), header.alg)?;

        // 2. Verify signature, iss and exp
        let mut validation = Validation::new(header.alg);
        validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);
        validation.set_issuer(&[&client.client_id]);
        validation.set_audience(&[&self.issuer, &self.token_endpoint]);
        validation.leeway = self.clock_skew.as_secs();

        let claims = jsonwebtoken::decode::<ClientAssertionClaims>(
            assertion,
            &decoding_key,
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(client_id = %client.client_id, error = %e, "Client assertion rejected");
            AuthError::invalid_client(format!("Invalid client assertion: {}", e))
        })?
        .claims;

        // 3. iss == sub == client_id
        if claims.iss != client.client_id || claims.sub != client.client_id {
            return Err(AuthError::invalid_client(
                "Assertion iss and sub must equal client_id",
            ));
        }

        // 4. aud names this provider
        if !claims.aud.contains(&self.issuer) && !claims.aud.contains(&self.token_endpoint) {
            return Err(AuthError::invalid_client(
                "Assertion audience must contain the issuer or token endpoint",
            ));
        }

        // 5. Bounded lifetime
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let horizon = (self.max_lifetime + self.clock_skew).as_secs() as i64;
        if claims.exp > now + horizon {
            return Err(AuthError::invalid_client(format!(
                "Assertion exp must be within {} seconds",
                self.max_lifetime.as_secs()
            )));
        }

        // 6. Single use
        if claims.jti.is_empty() {
            return Err(AuthError::invalid_client("Assertion jti is required"));
        }
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
            .map_err(|_| AuthError::invalid_client("Invalid exp timestamp"))?;
        if !jti_storage.mark_jti_used(&claims.jti, expires_at).await? {
            tracing::warn!(client_id = %client.client_id, "Client assertion jti replayed");
            return Err(AuthError::invalid_client(
                "Assertion jti already used (possible replay attack)",
            ));
        }

        Ok(claims)
    }
}

/// Returns `true` for HMAC algorithms.
pub(crate) fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Finds a signing key in `jwks` matching `kid` (when given) and `alg`.
pub(crate) fn decoding_key_from_jwks(
    jwks: &JwkSet,
    kid: Option<&str>,
    alg: Algorithm,
) -> AuthResult<DecodingKey> {
    let key = find_key(jwks, kid, alg).ok_or_else(|| match kid {
        Some(kid) => AuthError::invalid_client(format!("Key '{}' not found in client JWKS", kid)),
        None => AuthError::invalid_client("No suitable key found in client JWKS"),
    })?;

    DecodingKey::from_jwk(key).map_err(|e| AuthError::invalid_client(format!("Invalid JWK: {}", e)))
}

fn find_key<'a>(jwks: &'a JwkSet, kid: Option<&str>, alg: Algorithm) -> Option<&'a Jwk> {
    jwks.keys.iter().find(|key| {
        if let Some(expected_kid) = kid
            && key.common.key_id.as_deref() != Some(expected_kid)
        {
            return false;
        }

        if let Some(ref key_alg) = key.common.key_algorithm
            && key_alg.to_string() != algorithm_name(alg)
        {
            return false;
        }

        !matches!(
            key.common.public_key_use,
            Some(ref use_) if *use_ != PublicKeyUse::Signature
        )
    })
}

/// Converts a jsonwebtoken Algorithm to its JOSE name.
pub(crate) fn algorithm_name(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::EdDSA => "EdDSA",
    }
}

/// Reads `iss` (or `sub`) from an assertion without verifying it.
///
/// Only used to find the client whose keys verify the assertion when the
/// request carries no `client_id`.
pub fn extract_client_id_unverified(assertion: &str) -> AuthResult<String> {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[derive(Deserialize)]
    struct MinimalClaims {
        #[serde(default)]
        iss: Option<String>,
        #[serde(default)]
        sub: Option<String>,
    }

    let mut parts = assertion.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::invalid_client("Invalid JWT format"));
    };

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::invalid_client("Invalid JWT payload encoding"))?;
    let claims: MinimalClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|_| AuthError::invalid_client("Invalid JWT payload JSON"))?;

    claims
        .iss
        .or(claims.sub)
        .ok_or_else(|| AuthError::invalid_client("JWT missing iss and sub claims"))
}
