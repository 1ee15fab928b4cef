//! Admin API listener

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::Method;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::HttpConfig;
use crate::daemon::jobs::JobManager;
use crate::daemon::metrics::PipelineMetrics;

use super::auth::AuthState;
use super::handlers::AppState;
use super::routes::create_router;

pub struct HttpServer {
    config: HttpConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(
        config: HttpConfig,
        manager: Arc<JobManager>,
        metrics: Arc<PipelineMetrics>,
        metrics_enabled: bool,
    ) -> Self {
        Self {
            config,
            state: AppState {
                manager,
                metrics,
                metrics_enabled,
            },
        }
    }

    /// Routes plus the optional CORS layer and request tracing
    pub fn app(&self) -> Router {
        let auth = AuthState::new(self.config.api_keys.clone());
        if auth.is_open() {
            info!("No API keys configured; job and record routes are open");
        }
        let mut app = create_router(self.state.clone(), auth);
        if self.config.cors_enabled {
            // The dashboard is served from another origin and only reads
            // or posts JSON
            app = app.layer(
                CorsLayer::new()
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers(Any)
                    .allow_origin(Any),
            );
        }
        app.layer(TraceLayer::new_for_http())
    }

    /// Serve until a shutdown signal arrives
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid HTTP listen address '{}'", self.config.listen_addr))?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind admin API on {}", addr))?;
        info!("Admin API listening on http://{}", addr);

        axum::serve(listener, self.app())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("Admin API draining connections");
            })
            .await
            .context("Admin API server error")
    }
}
