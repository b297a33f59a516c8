//! Signed request objects (OpenID Connect Core Section 6.1).
//!
//! The `request` parameter carries the authorization parameters as claims
//! of a JWT signed by the client. Asymmetric signatures are checked against
//! the client's JWK set, HMAC signatures against its secret. Unsigned
//! objects (`alg: none`) are rejected.

use jsonwebtoken::{DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::authorize::AuthorizationParams;
use crate::oauth::client_assertion::{decoding_key_from_jwks, is_symmetric};
use crate::types::Client;

/// Verifies request objects and merges them into the query parameters.
#[derive(Debug, Clone)]
pub struct RequestObjectVerifier {
    issuer: String,
}

impl RequestObjectVerifier {
    /// Creates a verifier for objects addressed to `issuer`.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    /// Verifies `request_object` and merges its claims into `params`.
    ///
    /// A parameter present in both places must have the same value.
    /// Parameters only present in the object are adopted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` on a bad signature, wrong `iss`/`aud`,
    /// expiry, nested request parameters, or any value mismatch.
    pub fn merge(
        &self,
        request_object: &str,
        client: &Client,
        params: &mut AuthorizationParams,
    ) -> AuthResult<()> {
        let claims = self.verify(request_object, client)?;

        if claims.contains_key("request") || claims.contains_key("request_uri") {
            return Err(AuthError::invalid_request(
                "Request object must not contain request or request_uri",
            ));
        }

        if let Some(iss) = claims.get("iss")
            && iss.as_str() != Some(client.client_id.as_str())
        {
            return Err(AuthError::invalid_request(
                "Request object iss must equal client_id",
            ));
        }

        if let Some(aud) = claims.get("aud")
            && !self.audience_matches(aud)
        {
            return Err(AuthError::invalid_request(
                "Request object aud must contain the issuer",
            ));
        }

        merge_param(&claims, "response_type", &mut params.response_type)?;
        merge_param(&claims, "client_id", &mut params.client_id)?;
        merge_param(&claims, "redirect_uri", &mut params.redirect_uri)?;
        merge_param(&claims, "scope", &mut params.scope)?;
        merge_param(&claims, "state", &mut params.state)?;
        merge_param(&claims, "nonce", &mut params.nonce)?;
        merge_param(&claims, "code_challenge", &mut params.code_challenge)?;
        merge_param(
            &claims,
            "code_challenge_method",
            &mut params.code_challenge_method,
        )?;

        Ok(())
    }

    fn verify(&self, request_object: &str, client: &Client) -> AuthResult<Map<String, Value>> {
        let header = jsonwebtoken::decode_header(request_object).map_err(|e| {
            AuthError::invalid_request(format!("Malformed request object: {}", e))
        })?;

        let key = if is_symmetric(header.alg) {
            let secret = client.client_secret.as_deref().ok_or_else(|| {
                AuthError::invalid_request("HMAC request objects require a client secret")
            })?;
            DecodingKey::from_secret(secret.as_bytes())
        } else {
            let jwks = client.jwks.as_ref().ok_or_else(|| {
                AuthError::invalid_request("Client has no keys to verify the request object")
            })?;
            decoding_key_from_jwks(jwks, header.kid.as_deref(), header.alg).map_err(|e| {
                AuthError::invalid_request(format!(
                    "Request object key: {}",
                    e.public_description()
                ))
            })?
        };

        let mut validation = Validation::new(header.alg);
        validation.set_required_spec_claims::<&str>(&[]);
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<Map<String, Value>>(request_object, &key, &validation)
            .map_err(|e| {
                tracing::debug!(client_id = %client.client_id, error = %e, "Request object rejected");
                AuthError::invalid_request(format!("Invalid request object: {}", e))
            })?;

        Ok(data.claims)
    }

    fn audience_matches(&self, aud: &Value) -> bool {
        let base = self.issuer.trim_end_matches('/');
        let matches = |value: &str| value == self.issuer || value == base;
        match aud {
            Value::String(value) => matches(value),
            Value::Array(values) => values.iter().filter_map(Value::as_str).any(matches),
            _ => false,
        }
    }
}

fn merge_param(
    claims: &Map<String, Value>,
    name: &str,
    target: &mut Option<String>,
) -> AuthResult<()> {
    let Some(value) = claims.get(name) else {
        return Ok(());
    };
    let value = value.as_str().ok_or_else(|| {
        AuthError::invalid_request(format!("Request object claim '{}' must be a string", name))
    })?;

    match target {
        Some(existing) if existing != value => Err(AuthError::invalid_request(format!(
            "Parameter '{}' does not match the request object",
            name
        ))),
        Some(_) => Ok(()),
        None => {
            *target = Some(value.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::client_assertion::tests::{client_key, sign};
    use crate::types::{ClientType, GrantType, TokenEndpointAuthMethod};
    use jsonwebtoken::{EncodingKey, Header};

    const ISSUER: &str = "http://localhost:9998/";

    fn client() -> Client {
        Client {
            client_id: "web".to_string(),
            name: "Web".to_string(),
            client_type: ClientType::Confidential,
            client_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
            redirect_uris: vec!["https://app/cb".to_string()],
            auth_methods: vec![TokenEndpointAuthMethod::ClientSecretBasic],
            grant_types: vec![GrantType::AuthorizationCode],
            scopes: vec![],
            jwks: None,
            access_token_lifetime: None,
        }
    }

    fn hmac(claims: &Value) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(b"0123456789abcdef0123456789abcdef"),
        )
        .unwrap()
    }

    fn query() -> AuthorizationParams {
        AuthorizationParams {
            response_type: Some("code".to_string()),
            client_id: Some("web".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_object_only_params_adopted() {
        let object = hmac(&serde_json::json!({
            "iss": "web", "aud": ISSUER,
            "redirect_uri": "https://app/cb", "scope": "openid", "nonce": "n-1"
        }));
        let mut params = query();
        RequestObjectVerifier::new(ISSUER)
            .merge(&object, &client(), &mut params)
            .unwrap();
        assert_eq!(params.redirect_uri.as_deref(), Some("https://app/cb"));
        assert_eq!(params.scope.as_deref(), Some("openid"));
        assert_eq!(params.nonce.as_deref(), Some("n-1"));
    }

    #[test]
    fn test_mismatch_fails_whole_request() {
        let object = hmac(&serde_json::json!({ "client_id": "web", "scope": "openid email" }));
        let mut params = query();
        params.scope = Some("openid".to_string());
        let err = RequestObjectVerifier::new(ISSUER)
            .merge(&object, &client(), &mut params)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }

    #[test]
    fn test_wrong_issuer_and_audience() {
        let verifier = RequestObjectVerifier::new(ISSUER);

        let object = hmac(&serde_json::json!({ "iss": "someone-else" }));
        assert!(verifier.merge(&object, &client(), &mut query()).is_err());

        let object = hmac(&serde_json::json!({ "aud": ["https://other"] }));
        assert!(verifier.merge(&object, &client(), &mut query()).is_err());

        let object = hmac(&serde_json::json!({ "aud": ["https://other", "http://localhost:9998"] }));
        assert!(verifier.merge(&object, &client(), &mut query()).is_ok());
    }

    #[test]
    fn test_bad_signature_rejected() {
        let forged = jsonwebtoken::encode(
            &Header::default(),
            &serde_json::json!({ "scope": "openid" }),
            &EncodingKey::from_secret(b"not-the-client-secret-at-all-000"),
        )
        .unwrap();
        assert!(
            RequestObjectVerifier::new(ISSUER)
                .merge(&forged, &client(), &mut query())
                .is_err()
        );
    }

    #[test]
    fn test_unsigned_object_rejected() {
        // {"alg":"none"}.{"scope":"openid"}.
        let unsigned = "eyJhbGciOiJub25lIn0.eyJzY29wZSI6Im9wZW5pZCJ9.";
        assert!(
            RequestObjectVerifier::new(ISSUER)
                .merge(unsigned, &client(), &mut query())
                .is_err()
        );
    }

    #[test]
    fn test_expired_object_rejected() {
        let object = hmac(&serde_json::json!({ "exp": 1_000_000 }));
        assert!(
            RequestObjectVerifier::new(ISSUER)
                .merge(&object, &client(), &mut query())
                .is_err()
        );
    }

    #[test]
    fn test_asymmetric_object_with_client_jwks() {
        let key = client_key("rk");
        let mut client = client();
        client.jwks = Some(key.jwks.clone());
        let object = sign(&key, "rk", &serde_json::json!({ "iss": "web", "state": "s-1" }));

        let mut params = query();
        RequestObjectVerifier::new(ISSUER)
            .merge(&object, &client, &mut params)
            .unwrap();
        assert_eq!(params.state.as_deref(), Some("s-1"));
    }

    #[test]
    fn test_nested_request_rejected() {
        let object = hmac(&serde_json::json!({ "request_uri": "https://evil/req" }));
        assert!(
            RequestObjectVerifier::new(ISSUER)
                .merge(&object, &client(), &mut query())
                .is_err()
        );
    }
}
