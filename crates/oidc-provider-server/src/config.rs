use oidc_provider::config::ProviderConfig;
use oidc_provider::types::{Client, ClientType, GrantType, TokenEndpointAuthMethod};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Authorization server configuration
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Registered clients. The development clients are used when empty.
    #[serde(default)]
    pub clients: Vec<Client>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Provider validation
        self.provider
            .validate()
            .map_err(|e| format!("provider config error: {e}"))?;
        for client in &self.clients {
            client
                .validate()
                .map_err(|e| format!("client '{}': {e}", client.client_id))?;
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Configured clients, or the development clients when none are configured.
    pub fn clients(&self) -> Vec<Client> {
        if self.clients.is_empty() {
            seed_clients()
        } else {
            self.clients.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9998
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Development clients: `native` (public, PKCE), `web` and `api`
/// (confidential, secret `secret`).
pub fn seed_clients() -> Vec<Client> {
    vec![
        Client {
            client_id: "native".into(),
            name: "Native App".into(),
            client_type: ClientType::Public,
            client_secret: None,
            redirect_uris: vec!["http://127.0.0.1/callback".into()],
            auth_methods: vec![TokenEndpointAuthMethod::None],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            scopes: vec![],
            jwks: None,
            access_token_lifetime: None,
        },
        web_client("web", "Web App"),
        web_client("api", "API Client"),
    ]
}

fn web_client(client_id: &str, name: &str) -> Client {
    Client {
        client_id: client_id.into(),
        name: name.into(),
        client_type: ClientType::Confidential,
        client_secret: Some("secret".into()),
        redirect_uris: vec!["http://localhost:9999/auth/callback".into()],
        auth_methods: vec![
            TokenEndpointAuthMethod::ClientSecretBasic,
            TokenEndpointAuthMethod::ClientSecretPost,
        ],
        grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
        scopes: vec![],
        jwks: None,
        access_token_lifetime: None,
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "oidc-provider.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., OIDC_PROVIDER__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("OIDC_PROVIDER")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}
