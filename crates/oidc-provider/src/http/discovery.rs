//! OpenID Connect discovery handler.
//!
//! # References
//!
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::ProviderState;
use crate::types::{GrantType, TokenEndpointAuthMethod};

/// Well-known path of the discovery document.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Algorithms accepted on `private_key_jwt` client assertions.
const ASSERTION_SIGNING_ALGS: &[&str] = &[
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "EdDSA",
];

/// Claims that appear in ID tokens.
const CLAIMS_SUPPORTED: &[&str] = &["iss", "sub", "aud", "exp", "iat", "auth_time", "nonce"];

/// Handler for `GET /.well-known/openid-configuration`.
///
/// Endpoint URLs are built from the configured issuer, not the bind address.
pub async fn openid_configuration_handler(
    State(state): State<ProviderState>,
) -> impl IntoResponse {
    let provider = &state.provider;
    let config = provider.config();

    let mut code_challenge_methods = vec!["S256"];
    if config.pkce.allow_plain {
        code_challenge_methods.push("plain");
    }

    let grant_types = [GrantType::AuthorizationCode, GrantType::RefreshToken]
        .map(|grant| grant.as_str());
    let auth_methods = [
        TokenEndpointAuthMethod::None,
        TokenEndpointAuthMethod::ClientSecretBasic,
        TokenEndpointAuthMethod::ClientSecretPost,
        TokenEndpointAuthMethod::PrivateKeyJwt,
    ]
    .map(|method| method.as_str());

    let doc = serde_json::json!({
        "issuer": config.issuer,
        "authorization_endpoint": config.authorization_endpoint(),
        "token_endpoint": config.token_endpoint(),
        "jwks_uri": config.jwks_uri(),
        "scopes_supported": config.scopes_supported,
        "response_types_supported": ["code"],
        "response_modes_supported": ["query"],
        "grant_types_supported": grant_types,
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": [provider.jwt_service().algorithm().as_str()],
        "token_endpoint_auth_methods_supported": auth_methods,
        "token_endpoint_auth_signing_alg_values_supported": ASSERTION_SIGNING_ALGS,
        "code_challenge_methods_supported": code_challenge_methods,
        "claims_supported": CLAIMS_SUPPORTED,
        "request_parameter_supported": config.oauth.request_object_supported,
        "request_uri_parameter_supported": false,
        "ui_locales_supported": config.ui_locales_supported,
    });

    ([(header::CONTENT_TYPE, "application/json")], Json(doc))
}
