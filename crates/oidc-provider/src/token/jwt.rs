//! JWT signing and verification with the provider key.
//!
//! The provider signs with exactly one key, chosen at startup:
//!
//! - **RS256** / **RS384**: RSA 2048
//! - **ES384**: ECDSA P-384
//! - **HS256**: HMAC with a shared secret (nothing is published in the JWK set)
//!
//! The key is immutable after construction and shared through an `Arc`.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::SigningConfig;

/// Signing key and token verification errors.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Key material is missing, malformed, or does not fit the algorithm.
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// A key pair could not be generated at startup.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Claims could not be signed.
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// A presented token failed signature or claim checks.
    #[error("Token rejected: {0}")]
    Rejected(#[from] jsonwebtoken::errors::Error),
}

impl JwtError {
    /// Returns the verification failure, if this is one.
    #[must_use]
    pub fn rejection(&self) -> Option<&jsonwebtoken::errors::ErrorKind> {
        match self {
            Self::Rejected(err) => Some(err.kind()),
            _ => None,
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms for issued tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 and SHA-384.
    ES384,
    /// HMAC with SHA-256.
    HS256,
}

impl SigningAlgorithm {
    /// Parses a configured algorithm name.
    ///
    /// # Errors
    /// Returns `JwtError::InvalidKey` for unsupported names.
    pub fn parse(name: &str) -> Result<Self, JwtError> {
        match name {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            "HS256" => Ok(Self::HS256),
            other => Err(JwtError::InvalidKey(format!(
                "Unsupported signing algorithm: {}",
                other
            ))),
        }
    }

    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
            Self::HS256 => Algorithm::HS256,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
            Self::HS256 => "HS256",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    /// Returns `true` if this is a symmetric algorithm.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::HS256)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// End-user the token was issued for.
    pub sub: String,

    /// Audience, the client id.
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// JWT ID, the key of the stored token record.
    pub jti: String,

    /// Space-separated scopes.
    pub scope: String,

    /// OAuth client ID.
    pub client_id: String,
}

/// ID token claims (OpenID Connect Core 1.0, Section 2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,

    /// End-user.
    pub sub: String,

    /// Audience, the client id.
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// When the end-user authenticated (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Nonce from the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// Published JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig" for signing).
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// The provider's signing key.
pub struct SigningKeyPair {
    /// Key ID.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
}

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
    Symmetric,
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// Builds the key described by the configuration.
    ///
    /// RSA and EC keys come from PEM when configured and are generated
    /// otherwise. HS256 uses `crypto_key`, or a random 32-byte secret.
    ///
    /// # Errors
    /// Returns an error if the algorithm is unknown or the key material is invalid.
    pub fn from_config(config: &SigningConfig) -> Result<Self, JwtError> {
        let algorithm = SigningAlgorithm::parse(&config.algorithm)?;
        let kid = config
            .key_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut key = match algorithm {
            SigningAlgorithm::HS256 => {
                let secret = match &config.crypto_key {
                    Some(hex_key) => hex::decode(hex_key)
                        .map_err(|e| JwtError::InvalidKey(format!("crypto_key: {}", e)))?,
                    None => {
                        tracing::warn!(
                            "No signing.crypto_key configured; generated an ephemeral HS256 key"
                        );
                        let mut bytes = vec![0u8; 32];
                        OsRng.fill_bytes(&mut bytes);
                        bytes
                    }
                };
                Self::from_secret(kid.clone(), &secret)?
            }
            _ => match (&config.private_key_pem, &config.public_key_pem) {
                (Some(private_pem), Some(public_pem)) => {
                    Self::from_pem(kid.clone(), algorithm, private_pem, public_pem)?
                }
                _ => {
                    tracing::warn!(
                        algorithm = %algorithm,
                        "No signing key configured; generated an ephemeral key pair"
                    );
                    if algorithm.is_rsa() {
                        Self::generate_rsa(algorithm)?
                    } else {
                        Self::generate_ec()?
                    }
                }
            },
        };
        key.kid = kid;
        Ok(key)
    }

    /// Generates a new RSA key pair.
    ///
    /// # Errors
    /// Returns an error if key generation fails or algorithm is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::InvalidKey(format!(
                "Algorithm {} is not RSA-based",
                algorithm
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::KeyGeneration(e.to_string()))?;

        Self::from_pem(
            uuid::Uuid::new_v4().to_string(),
            algorithm,
            &private_pem,
            &public_pem,
        )
    }

    /// Generates a new P-384 key pair for ES384.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        Self::from_ec_secret(uuid::Uuid::new_v4().to_string(), &secret_key)
    }

    /// Builds an HS256 key from a shared secret.
    ///
    /// # Errors
    /// Returns an error if the secret is shorter than 32 bytes.
    pub fn from_secret(kid: impl Into<String>, secret: &[u8]) -> Result<Self, JwtError> {
        if secret.len() < 32 {
            return Err(JwtError::InvalidKey(
                "HS256 secret must be at least 32 bytes".to_string(),
            ));
        }
        Ok(Self {
            kid: kid.into(),
            algorithm: SigningAlgorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            public_key_data: PublicKeyData::Symmetric,
        })
    }

    /// Loads a key pair from PEM strings.
    ///
    /// EC private keys may be PKCS#8 or SEC1.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        match algorithm {
            SigningAlgorithm::RS256 | SigningAlgorithm::RS384 => {
                let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                    .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
                let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                    .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

                let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                    .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
                let n = public_key.n().to_bytes_be();
                let e = public_key.e().to_bytes_be();

                Ok(Self {
                    kid: kid.into(),
                    algorithm,
                    encoding_key,
                    decoding_key,
                    public_key_data: PublicKeyData::Rsa { n, e },
                })
            }
            SigningAlgorithm::ES384 => {
                let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                    .or_else(|_| EcSecretKey::from_sec1_pem(private_pem))
                    .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
                Self::from_ec_secret(kid, &secret_key)
            }
            SigningAlgorithm::HS256 => Err(JwtError::InvalidKey(
                "HS256 keys are configured with crypto_key, not PEM".to_string(),
            )),
        }
    }

    fn from_ec_secret(kid: impl Into<String>, secret_key: &EcSecretKey) -> Result<Self, JwtError> {
        let signing_key = EcSigningKey::from(secret_key);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| JwtError::InvalidKey("Missing x coordinate".to_string()))?;
        let y = point
            .y()
            .ok_or_else(|| JwtError::InvalidKey("Missing y coordinate".to_string()))?;

        // jsonwebtoken reads EC signing keys as PKCS#8.
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

        let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
        let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
        let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

        Ok(Self {
            kid: kid.into(),
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
        })
    }

    /// Exports the public key as a JWK. Symmetric keys are never published.
    #[must_use]
    pub fn to_jwk(&self) -> Option<Jwk> {
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Some(Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            }),
            PublicKeyData::Ec { x, y } => Some(Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            }),
            PublicKeyData::Symmetric => None,
        }
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Encodes and decodes provider-signed JWTs.
#[derive(Debug)]
pub struct JwtService {
    signing_key: SigningKeyPair,
    issuer: String,
}

impl JwtService {
    /// Creates a new JWT service.
    #[must_use]
    pub fn new(signing_key: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
        }
    }

    /// Encodes claims into a JWT string, with `kid` in the header.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::Signing(e.to_string()))
    }

    /// Decodes a JWT, checking signature, issuer and expiry.
    ///
    /// # Errors
    /// Returns an error if decoding or validation fails.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.validate_aud = false;

        Ok(decode(token, &self.signing_key.decoding_key, &validation)?)
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    /// Returns the signing key ID.
    #[must_use]
    pub fn current_kid(&self) -> &str {
        &self.signing_key.kid
    }

    /// Returns the issuer URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the public JWK set.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self.signing_key.to_jwk().into_iter().collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
