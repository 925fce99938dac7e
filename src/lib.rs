pub mod auth;
pub mod config;
pub mod error;
pub mod flags;
pub mod gate;
pub mod hotreload;
pub mod metrics;
pub mod observability;
pub mod proxy;
pub mod sidecar;

use crate::auth::build_authenticator;
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::flags::FeatureState;
use crate::gate::{middleware::auth_gate_middleware, AuthGate};
use crate::metrics::{metrics_handler, MetricsService};
use crate::proxy::{forward_handler, UpstreamState};
use axum::{
    middleware,
    routing::{any, get},
    Router as AxumRouter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Build the HTTP application.
///
/// `/health` and `/metrics` are public; every other path goes through the
/// gate and is then forwarded upstream. The request timeout sits inside the
/// gate so a timed-out response still receives the authentication headers.
pub fn build_app(
    gate: AuthGate,
    upstream: UpstreamState,
    metrics: Option<MetricsService>,
    request_timeout: Duration,
) -> AxumRouter {
    let protected = AxumRouter::new()
        .route("/", any(forward_handler))
        .route("/*path", any(forward_handler))
        .with_state(upstream)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn_with_state(gate, auth_gate_middleware));

    let mut app = AxumRouter::new().route("/health", get(health_handler));
    if let Some(metrics) = metrics {
        app = app.merge(
            AxumRouter::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.merge(protected).layer(TraceLayer::new_for_http())
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Initialize and run the gate server
pub async fn init_gate(config: GateConfig, config_path: Option<PathBuf>) -> Result<()> {
    config.validate()?;

    info!("Starting authentication gate");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let features = Arc::new(FeatureState::new(&config.features));
    let authenticator = build_authenticator(&config.auth)?;
    let gate = AuthGate::new(features.clone(), authenticator);
    let upstream = UpstreamState::new(&config.upstream)?;
    info!(upstream = %config.upstream.url, "Forwarding allowed requests upstream");

    let metrics = if config.observability.metrics_enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };

    if config.hot_reload.enabled {
        match config_path {
            Some(path) => {
                hotreload::watch_config_file(path, features, config.hot_reload.debounce_ms).await?
            }
            None => warn!("Hot reload enabled but no configuration file to watch"),
        }
    }

    let app = build_app(
        gate,
        upstream,
        metrics,
        Duration::from_secs(config.server.timeout_secs),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GateError::Io)?;

    info!("Gate ready to accept connections");

    axum::serve(listener, app)
        .await
        .map_err(|e| GateError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
