//! PKCE (Proof Key for Code Exchange), RFC 7636.
//!
//! `S256` is always accepted. `plain` is accepted only when the provider
//! policy allows it.
//!
//! # Example
//!
//! ```
//! use oidc_provider::oauth::{PkceChallenge, PkceChallengeMethod, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//!
//! let stored = PkceChallenge::new(challenge.as_str().to_string(), PkceChallengeMethod::S256).unwrap();
//! assert!(stored.verify(&verifier).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be [A-Za-z0-9-._~]")]
    InvalidVerifierCharacters,

    /// Challenge format is invalid.
    #[error("Invalid code_challenge format")]
    InvalidChallengeFormat,

    /// Unsupported or disallowed challenge method.
    #[error("Unsupported code_challenge_method: {0}")]
    UnsupportedMethod(String),

    /// Verifier doesn't match the challenge.
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl PkceError {
    /// Returns `true` if this is a verifier validation error.
    #[must_use]
    pub fn is_verifier_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidVerifierLength(_) | Self::InvalidVerifierCharacters
        )
    }

    /// Returns the OAuth 2.0 error code for this error.
    ///
    /// Challenge problems are reported at the authorization endpoint
    /// (`invalid_request`); verifier problems at the token endpoint
    /// (`invalid_grant`).
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidChallengeFormat | Self::UnsupportedMethod(_) => "invalid_request",
            Self::InvalidVerifierLength(_)
            | Self::InvalidVerifierCharacters
            | Self::VerificationFailed => "invalid_grant",
        }
    }
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PkceChallengeMethod {
    /// `BASE64URL(SHA256(verifier))`.
    S256,
    /// The challenge is the verifier itself.
    #[serde(rename = "plain")]
    Plain,
}

impl PkceChallengeMethod {
    /// Parses the `code_challenge_method` parameter.
    ///
    /// An absent method means `plain` (RFC 7636 Section 4.3).
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for unknown methods, and for
    /// `plain` when `allow_plain` is false.
    pub fn parse(method: Option<&str>, allow_plain: bool) -> Result<Self, PkceError> {
        match method.unwrap_or("plain") {
            "S256" => Ok(Self::S256),
            "plain" if allow_plain => Ok(Self::Plain),
            "plain" => Err(PkceError::UnsupportedMethod(
                "plain (only S256 is allowed)".to_string(),
            )),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Returns the method as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// PKCE code verifier: 43-128 unreserved characters.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a new verifier from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is not 43-128 characters or the value
    /// contains characters other than `[A-Za-z0-9-._~]`.
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }
        if !verifier.chars().all(is_unreserved) {
            return Err(PkceError::InvalidVerifierCharacters);
        }
        Ok(Self(verifier))
    }

    /// Generate a random verifier (32 bytes, base64url, 43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// A code challenge together with its method, as stored on the authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    challenge: String,
    method: PkceChallengeMethod,
}

impl PkceChallenge {
    /// Computes the S256 challenge for a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        Self {
            challenge: s256(verifier.as_str()),
            method: PkceChallengeMethod::S256,
        }
    }

    /// Validates a challenge received from a client.
    ///
    /// S256 challenges are 43 base64url characters (a SHA-256 digest);
    /// plain challenges follow the verifier syntax.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::InvalidChallengeFormat` if the value is malformed.
    pub fn new(challenge: String, method: PkceChallengeMethod) -> Result<Self, PkceError> {
        let well_formed = match method {
            PkceChallengeMethod::S256 => {
                challenge.len() == 43
                    && URL_SAFE_NO_PAD
                        .decode(&challenge)
                        .is_ok_and(|bytes| bytes.len() == 32)
            }
            PkceChallengeMethod::Plain => PkceVerifier::new(challenge.clone()).is_ok(),
        };
        if !well_formed {
            return Err(PkceError::InvalidChallengeFormat);
        }
        Ok(Self { challenge, method })
    }

    /// Verifies a presented verifier in constant time.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::VerificationFailed` if the verifier doesn't match.
    pub fn verify(&self, verifier: &PkceVerifier) -> Result<(), PkceError> {
        let computed = match self.method {
            PkceChallengeMethod::S256 => s256(verifier.as_str()),
            PkceChallengeMethod::Plain => verifier.as_str().to_string(),
        };
        if bool::from(computed.as_bytes().ct_eq(self.challenge.as_bytes())) {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    /// Get the challenge value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.challenge
    }

    /// Get the challenge method.
    #[must_use]
    pub fn method(&self) -> PkceChallengeMethod {
        self.method
    }
}

fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// =============================================================================
// Tests
// =============================================================================
