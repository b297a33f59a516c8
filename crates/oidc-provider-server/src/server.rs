use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, routing::get};
use oidc_provider::provider::Provider;
use oidc_provider::storage::Storage;
use oidc_provider::{AuthResult, InMemoryStorage};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;

pub struct OidcProviderServer {
    addr: SocketAddr,
    app: Router,
    provider: Arc<Provider>,
    cleanup_interval: Duration,
}

pub fn build_app(cfg: &AppConfig, provider: Arc<Provider>) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    oidc_provider::router(provider)
        .route("/healthz", get(healthz))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    // Query strings carry state and codes; only the path is recorded
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Builds the provider on in-memory storage and the router around it.
    pub fn build(self) -> AuthResult<OidcProviderServer> {
        let provider = Arc::new(Provider::new(
            self.config.provider.clone(),
            self.config.clients(),
            InMemoryStorage::new(),
        )?);
        let app = build_app(&self.config, provider.clone());

        Ok(OidcProviderServer {
            addr: self.config.addr(),
            app,
            cleanup_interval: self.config.provider.storage.cleanup_interval,
            provider,
        })
    }
}

impl OidcProviderServer {
    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until Ctrl+C.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let cleanup = spawn_cleanup(self.provider.storage().clone(), self.cleanup_interval);

        tracing::info!(
            addr = %listener.local_addr()?,
            issuer = %self.provider.config().issuer,
            "listening"
        );
        let result = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        cleanup.abort();
        result?;
        Ok(())
    }
}

/// Purges expired requests, codes, tokens and assertion ids on a fixed interval.
fn spawn_cleanup(storage: Arc<dyn Storage>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match storage.cleanup_expired(OffsetDateTime::now_utc()).await {
                Ok(report) if report.total() > 0 => {
                    tracing::info!(
                        auth_requests = report.auth_requests,
                        codes = report.codes,
                        tokens = report.tokens,
                        jtis = report.jtis,
                        "expired state purged"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "cleanup of expired state failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
