use std::env;
use std::fmt;

use oidc_provider_server::ServerBuilder;
use oidc_provider_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use oidc_provider_server::observability::{apply_logging_level, init_tracing, shutdown_tracing};

const CONFIG_ENV: &str = "OIDC_PROVIDER_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigOrigin {
    Flag,
    Env,
    Default,
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flag => "--config",
            Self::Env => CONFIG_ENV,
            Self::Default => "default",
        })
    }
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let (config_path, origin) = config_path(&args, env::var(CONFIG_ENV).ok());
    let cfg = match load_config(Some(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(path = %config_path, origin = %origin, "Configuration loaded");
    apply_logging_level(&cfg.logging.level);

    if cfg.clients.is_empty() {
        tracing::warn!("No clients configured; registering development clients native, web and api");
    }

    let server = match ServerBuilder::new().with_config(cfg).build() {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Provider initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "Server terminated");
    }

    shutdown_tracing();
}

/// A missing `.env` is fine; an unreadable one is reported.
fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("Ignoring .env: {e}"),
    }
}

/// `--config <path>`, then `OIDC_PROVIDER_CONFIG`, then `oidc-provider.toml`.
fn config_path(args: &[String], from_env: Option<String>) -> (String, ConfigOrigin) {
    if let Some(path) = args
        .windows(2)
        .find(|pair| pair[0] == "--config")
        .map(|pair| pair[1].clone())
    {
        return (path, ConfigOrigin::Flag);
    }

    match from_env {
        Some(path) if !path.is_empty() => (path, ConfigOrigin::Env),
        _ => (DEFAULT_CONFIG_PATH.to_string(), ConfigOrigin::Default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn flag_wins_over_env() {
        let resolved = config_path(&args(&["--config", "a.toml"]), Some("b.toml".into()));
        assert_eq!(resolved, ("a.toml".to_string(), ConfigOrigin::Flag));
    }

    #[test]
    fn env_then_default() {
        assert_eq!(
            config_path(&[], Some("b.toml".into())),
            ("b.toml".to_string(), ConfigOrigin::Env)
        );
        assert_eq!(
            config_path(&args(&["--config"]), Some(String::new())),
            (DEFAULT_CONFIG_PATH.to_string(), ConfigOrigin::Default)
        );
    }
}
