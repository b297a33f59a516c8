use std::{env, fs, time::Duration};

use oidc_provider_server::config::AppConfig;
use oidc_provider_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("oidc-provider.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 9100

[logging]
level = "debug"

[provider]
issuer = "https://login.example.com/"
scopes_supported = ["openid", "email", "offline_access"]

[provider.oauth]
authorization_code_lifetime = "30s"
refresh_token_rotation = false

[provider.pkce]
allow_plain = true

[provider.signing]
algorithm = "ES384"
key_id = "ec-1"

[[clients]]
client_id = "portal"
name = "Portal"
client_type = "confidential"
client_secret = "portal-secret"
redirect_uris = ["https://portal.example.com/cb"]
auth_methods = ["client_secret_basic"]
scopes = ["openid", "email"]
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 9100);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.provider.issuer, "https://login.example.com/");
    assert_eq!(
        cfg.provider.oauth.authorization_code_lifetime,
        Duration::from_secs(30)
    );
    assert!(!cfg.provider.oauth.refresh_token_rotation);
    assert!(cfg.provider.pkce.allow_plain);
    assert_eq!(cfg.provider.signing.key_id.as_deref(), Some("ec-1"));
    // Unset values keep their defaults
    assert_eq!(cfg.provider.endpoints.token, "/oauth/token");
    assert_eq!(cfg.provider.storage.max_attempts, 3);

    let clients = cfg.clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].client_id, "portal");
    assert_eq!(clients[0].grant_types.len(), 2);

    // 2) Env override should win over file
    unsafe {
        env::set_var("OIDC_PROVIDER__SERVER__PORT", "9200");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9200);
    unsafe {
        env::remove_var("OIDC_PROVIDER__SERVER__PORT");
    }

    // 3) Invalid values are rejected
    let bad = dir.path().join("bad.toml");
    fs::write(
        &bad,
        r#"
[provider.signing]
algorithm = "none"
"#,
    )
    .expect("write toml");
    let err = load_config(bad.to_str()).expect_err("unknown algorithm must fail");
    assert!(err.contains("provider config error"));
}

#[test]
fn default_config_round_trips_through_toml() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("defaults.toml");

    let rendered = toml::to_string(&AppConfig::default()).expect("serialize defaults");
    fs::write(&path, rendered).expect("write toml");

    let cfg = load_config(path.to_str()).expect("defaults should load");
    assert_eq!(cfg.provider.issuer, "http://localhost:9998/");
    assert_eq!(
        cfg.provider.oauth.refresh_token_lifetime,
        Duration::from_secs(30 * 24 * 3600)
    );
    assert_eq!(cfg.clients().len(), 3);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).expect("defaults should load");
    assert_eq!(cfg.provider.endpoints.authorization, "/auth");
    assert_eq!(cfg.provider.endpoints.login_url, "/login/username");
}
