//! HTTP API server for transit-core.
//!
//! A thin JSON surface over the dispatcher plus cache administration.
//!
//! # Example
//!
//! ```bash
//! # Start the server with the built-in reference workers
//! transit-core serve --port 8080 --reference-workers
//!
//! # Run an analytics request
//! curl -X POST "http://localhost:8080/api/v1/analytics/summary" -d '{}'
//!
//! # Inspect the caches
//! curl "http://localhost:8080/api/v1/admin/cache"
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::prewarm;

/// Shared application state.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for all origins.
    pub cors: bool,
    /// Delay before pre-warming; `None` disables it.
    pub prewarm_delay: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors: false,
            prewarm_delay: Some(prewarm::DEFAULT_PREWARM_DELAY),
        }
    }
}

/// Build the API router around a dispatcher.
pub fn build_router(dispatcher: Arc<Dispatcher>, cors: bool) -> Router {
    let state = Arc::new(AppState { dispatcher });

    let api_routes = Router::new()
        .route("/analytics/{request_type}", post(handlers::run_analytics))
        .route("/predict", post(handlers::predict))
        .route("/admin/cache", get(handlers::cache_stats))
        .route("/admin/cache/clear", post(handlers::clear_cache))
        .route("/admin/cache/refresh", post(handlers::refresh_cache))
        .route("/stats", get(handlers::get_stats))
        .route("/health", get(handlers::health_check));

    let mut app = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .with_state(state);

    if cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .max_age(Duration::from_secs(3600)),
        );
    }

    app
}

/// Start the workers, serve until Ctrl+C, then stop the workers.
///
/// Pre-warming starts once the listener is bound.
pub async fn run_server(dispatcher: Arc<Dispatcher>, config: ServerConfig) -> Result<()> {
    let startup = dispatcher.initialize().await;
    if startup.analytics.ready.is_empty() {
        warn!("Serving without analytics workers; analytics requests will time out");
    }

    let app = build_router(dispatcher.clone(), config.cors);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Listening");

    eprintln!("Starting transit-core API server on http://{}", addr);
    eprintln!("Press Ctrl+C to stop");

    if let Some(delay) = config.prewarm_delay {
        prewarm::spawn_prewarm(dispatcher.clone(), delay);
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    dispatcher.shutdown().await;
    eprintln!("\nServer stopped");

    served?;
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
