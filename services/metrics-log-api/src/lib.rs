//! HTTP service exercising request-level observability around a handful of
//! synthetic endpoints.

pub mod config;
pub mod endpoints;
pub mod error;
pub mod exit;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, MethodRouter};
use axum::Router;
use common_obs::{
    health_router, JsonLogger, LogRecord, Observability, Registry, RequestMetrics,
    PROMETHEUS_CONTENT_TYPE,
};
use tokio::net::TcpListener;

use config::ServiceConfig;
use endpoints::{Crash, ForcedError, Root, Slow};
use error::ServiceError;
use exit::{ProcessExit, StdProcessExit};

pub const SERVICE_NAME: &str = "metrics-log-api";

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state created once at startup and alive for the process lifetime.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub observability: Observability,
    pub exit: Arc<dyn ProcessExit>,
}

impl AppState {
    pub fn new(logger: JsonLogger, exit: Arc<dyn ProcessExit>) -> Self {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(RequestMetrics::register(&registry));
        let observability = Observability::new(metrics, Arc::new(logger));
        Self {
            registry,
            observability,
            exit,
        }
    }

    pub fn metrics(&self) -> &RequestMetrics {
        self.observability.metrics()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let obs = &state.observability;
    let metrics = obs.metrics();
    let fallback: MethodRouter<Arc<AppState>> =
        obs.wrap("root", Root::new(Arc::clone(metrics)));

    Router::new()
        .route("/", obs.wrap("root", Root::new(Arc::clone(metrics))))
        .route("/slow", obs.wrap("slow", Slow::new(Arc::clone(metrics))))
        .route("/error", obs.wrap("error", ForcedError::new(Arc::clone(metrics))))
        .route(
            "/crash",
            obs.wrap(
                "crash",
                Crash::new(
                    Arc::clone(metrics),
                    Arc::clone(obs.logger()),
                    Arc::clone(&state.exit),
                ),
            ),
        )
        .route("/metrics", get(metrics_handler))
        .fallback(fallback)
        .with_state(Arc::clone(&state))
        .merge(health_router())
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        )],
        state.registry.encode(),
    )
}

/// Bind and serve until Ctrl-C.
pub async fn run(config: ServiceConfig) -> Result<(), ServiceError> {
    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(JsonLogger::stdout(), Arc::new(StdProcessExit)));
    let logger = Arc::clone(state.observability.logger());
    let router = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServiceError::Bind { addr, source })?;

    logger.emit(&starting_record(addr));

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(ServiceError::Serve)?;

    logger.emit(&LogRecord::info("server stopped").with_extra("service", SERVICE_NAME));
    Ok(())
}

/// Startup notice. Written through the request logger, which has no level
/// filter.
fn starting_record(addr: SocketAddr) -> LogRecord {
    LogRecord::info("starting server")
        .with_extra("service", SERVICE_NAME)
        .with_extra("version", VERSION)
        .with_extra("addr", addr.to_string())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(error) => {
            tracing::error!(%error, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
