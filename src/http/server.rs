//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: `/health` plus a catch-all proxy route
//! - Wire up middleware (request ID, tracing, path filters)
//! - Serve until the shutdown signal, then drain in-flight requests

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware,
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::handlers::HandlerSet;
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::proxy::{InvalidUpstream, Proxy};
use crate::security::{path_filter_middleware, PathFilters};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<Proxy>,
    pub log_health_check: bool,
}

/// HTTP server for the transforming proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and hooks.
    pub fn new(config: ProxyConfig, handlers: HandlerSet) -> Result<Self, InvalidUpstream> {
        let proxy = Arc::new(Proxy::new(&config, handlers)?);
        let filters = Arc::new(PathFilters::new(&config.filters));

        let state = AppState {
            proxy,
            log_health_check: config.observability.log_health_check,
        };

        let router = Self::build_router(state, filters);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState, filters: Arc<PathFilters>) -> Router {
        let mut proxy_routes = Router::new()
            .fallback(proxy_handler)
            .with_state(state.clone());
        if filters.is_active() {
            proxy_routes =
                proxy_routes.layer(middleware::from_fn_with_state(filters, path_filter_middleware));
        }

        Router::new()
            .route(
                "/health",
                get(health_handler).fallback_service(proxy_routes.clone()),
            )
            .with_state(state)
            .fallback_service(proxy_routes)
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires, then drain open requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.url,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

async fn health_handler(State(state): State<AppState>) -> &'static str {
    if state.log_health_check {
        tracing::info!("Health check");
    }
    "OK"
}

/// Catch-all handler: every request that is not `GET /health`.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    state.proxy.handle(request, addr).await
}
