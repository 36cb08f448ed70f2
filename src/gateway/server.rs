//! # HTTP Server Module
//!
//! Axum application exposing the metadata proxy:
//!
//! - `GET /api/tmdb?endpoint=...`: cached, deduplicated, rate-limited proxy
//! - `GET /api/tmdb/*path`: raw passthrough to the upstream
//! - `GET /health`, `GET /ready`: liveness and readiness
//! - `GET /stats`: cache, rate limiter and in-flight statistics
//! - `GET /metrics`: Prometheus exposition when a recorder is installed

use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::identity::client_id;
use crate::gateway::proxy::{GatewayStats, ProxyGateway};
use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, instrument};
use url::form_urlencoded;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ServerState {
    pub gateway: ProxyGateway,
    pub metrics: Option<PrometheusHandle>,
}

/// The gateway HTTP server
pub struct GatewayServer {
    state: ServerState,
    bind_addr: SocketAddr,
}

impl GatewayServer {
    /// Build the server from configuration; `metrics` is the installed Prometheus handle, if any.
    pub fn new(config: &GatewayConfig, metrics: Option<PrometheusHandle>) -> GatewayResult<Self> {
        let bind_addr = config.server.socket_addr()?;
        let gateway = ProxyGateway::new(config)?;
        let metrics = metrics.filter(|_| config.observability.metrics.enabled);

        Ok(Self {
            state: ServerState { gateway, metrics },
            bind_addr,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn gateway(&self) -> &ProxyGateway {
        &self.state.gateway
    }

    /// The axum application, without binding a socket
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve until `shutdown` resolves, running the cache and rate-limiter sweepers meanwhile.
    #[instrument(skip(self, shutdown))]
    pub async fn start<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            GatewayError::internal(format!("Failed to bind gateway server to {}: {}", self.bind_addr, e))
        })?;
        info!(address = %self.bind_addr, "Gateway HTTP server listening");

        let maintenance = self.state.gateway.spawn_maintenance();
        let app = self.router();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)));

        for task in maintenance {
            task.abort();
        }
        info!("Gateway HTTP server stopped");
        served
    }
}

/// Assemble routes and layers around `state`
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/api/tmdb", get(proxy_handler))
        .route("/api/tmdb/*path", get(passthrough_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}

async fn proxy_handler(
    State(state): State<ServerState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let client = client_id(&headers);
    let endpoint = query
        .as_deref()
        .and_then(|query| first_query_value(query, "endpoint"));

    match state.gateway.handle(endpoint.as_deref(), &client).await {
        Ok(response) => response.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn passthrough_handler(
    State(state): State<ServerState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    match state
        .gateway
        .upstream()
        .passthrough(&path, query.as_deref())
        .await
    {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = HeaderValue::from_str(&upstream.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

            let mut response = Response::new(Body::from(upstream.body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
            response
        }
        Err(e @ GatewayError::ServerConfig { .. }) | Err(e @ GatewayError::ClientInput { .. }) => {
            e.into_response()
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": format!("Proxy error: {}", e) })),
        )
            .into_response(),
    }
}

/// First value of `name` in a query string; later repeats are ignored.
fn first_query_value(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    let health_info = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    });

    (StatusCode::OK, Json(health_info))
}

/// Readiness check handler: ready once the upstream credential is configured
pub async fn readiness_check(State(state): State<ServerState>) -> impl IntoResponse {
    let credential_ok = state.gateway.upstream().api_key().is_some();

    let readiness_info = serde_json::json!({
        "status": if credential_ok { "ready" } else { "not_ready" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "checks": {
            "upstream_credential": if credential_ok { "ok" } else { "missing" },
        }
    });

    let status = if credential_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness_info))
}

async fn stats_handler(State(state): State<ServerState>) -> Json<GatewayStats> {
    Json(state.gateway.stats())
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Metrics are disabled" })),
        )
            .into_response(),
    }
}
