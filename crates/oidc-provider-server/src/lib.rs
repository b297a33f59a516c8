pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use observability::{init_tracing, shutdown_tracing};
pub use server::{OidcProviderServer, ServerBuilder, build_app};
