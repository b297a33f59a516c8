use std::sync::Arc;

use oidc_provider::provider::Provider;
use oidc_provider_server::{AppConfig, ServerBuilder};
use reqwest::StatusCode;
use reqwest::redirect::Policy;
use tokio::net::TcpListener;

const REDIRECT_URI: &str = "http://localhost:9999/auth/callback";
// RFC 7636 Appendix B
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

async fn start_server() -> (String, Arc<Provider>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut cfg = AppConfig::default();
    cfg.provider.issuer = format!("http://{addr}/");
    cfg.provider.signing.algorithm = "HS256".into();
    cfg.provider.signing.crypto_key = Some("ab".repeat(32));

    let server = ServerBuilder::new().with_config(cfg).build().unwrap();
    let provider = server.provider().clone();
    tokio::spawn(server.serve(listener));

    (format!("http://{addr}"), provider)
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap()
}

fn location(response: &reqwest::Response) -> url::Url {
    let value = response.headers()[reqwest::header::LOCATION].to_str().unwrap();
    url::Url::parse(value).unwrap()
}

fn query_param(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn authorization_code_flow_over_http() {
    let (base, provider) = start_server().await;
    let http = http_client();

    // 1) Authorization request parks and sends the browser to the login UI
    let response = http
        .get(format!("{base}/auth"))
        .query(&[
            ("response_type", "code"),
            ("client_id", "web"),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "openid offline_access"),
            ("state", "st-1"),
            ("code_challenge", CHALLENGE),
            ("code_challenge_method", "S256"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let login = location(&response);
    assert_eq!(login.path(), "/login/username");
    let request_id = query_param(&login, "auth_request_id").unwrap();

    // 2) The login UI reports the authenticated subject
    let callback = provider
        .authorization()
        .complete_authorization(request_id.parse().unwrap(), "alice")
        .await
        .unwrap();
    let callback = url::Url::parse(&callback).unwrap();
    assert!(callback.as_str().starts_with(REDIRECT_URI));
    assert_eq!(query_param(&callback, "state").as_deref(), Some("st-1"));
    let code = query_param(&callback, "code").unwrap();

    // 3) Code exchange with HTTP Basic client authentication
    let token_form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT_URI),
        ("code_verifier", VERIFIER),
    ];
    let response = http
        .post(format!("{base}/oauth/token"))
        .basic_auth("web", Some("secret"))
        .form(&token_form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["cache-control"], "no-store");
    let tokens: serde_json::Value = response.json().await.unwrap();
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["scope"], "openid offline_access");

    let id_token = provider
        .jwt_service()
        .decode::<serde_json::Value>(tokens["id_token"].as_str().unwrap())
        .unwrap()
        .claims;
    assert_eq!(id_token["sub"], "alice");
    assert_eq!(id_token["aud"], "web");
    assert!(id_token.get("nonce").is_none());

    // 4) Refresh rotates the refresh token
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();
    let response = http
        .post(format!("{base}/oauth/token"))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", "web"),
            ("client_secret", "secret"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed: serde_json::Value = response.json().await.unwrap();
    let rotated = refreshed["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh_token);

    // 5) Replaying the code fails and revokes the whole family
    let response = http
        .post(format!("{base}/oauth/token"))
        .basic_auth("web", Some("secret"))
        .form(&token_form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["error"], "invalid_grant");

    let response = http
        .post(format!("{base}/oauth/token"))
        .basic_auth("web", Some("secret"))
        .form(&[("grant_type", "refresh_token"), ("refresh_token", rotated.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unregistered_redirect_is_never_followed() {
    let (base, _provider) = start_server().await;

    let response = http_client()
        .get(format!("{base}/auth"))
        .query(&[
            ("response_type", "code"),
            ("client_id", "web"),
            ("redirect_uri", "https://attacker.example/cb"),
            ("scope", "openid"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(reqwest::header::LOCATION).is_none());
}

#[tokio::test]
async fn discovery_and_health() {
    let (base, _provider) = start_server().await;
    let http = http_client();

    let doc: serde_json::Value = http
        .get(format!("{base}/.well-known/openid-configuration"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["issuer"], format!("{base}/"));
    assert_eq!(doc["token_endpoint"], format!("{base}/oauth/token"));

    let response = http.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
