//! `SwitchboardServer`: Axum HTTP + WebSocket server and background tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use switchboard_core::Registrations;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::connections::ConnectionRegistry;
use crate::dispatcher::Dispatcher;
use crate::errors::{Result, ServerError};
use crate::handlers::HandlerRegistry;
use crate::health::{self, HealthResponse};
use crate::janitor::spawn_janitor;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::tracker::sweep::spawn_sweep;
use crate::tracker::{RequestTracker, TrackerConfig};
use crate::websocket::handler::{component_socket, session_socket};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Envelope dispatcher (owns the registries and tracker).
    pub dispatcher: Arc<Dispatcher>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The switchboard server.
pub struct SwitchboardServer {
    config: Arc<ServerConfig>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl SwitchboardServer {
    /// Wire registries, tracker and dispatcher together.
    pub fn new(config: ServerConfig, handlers: HandlerRegistry, tracker: TrackerConfig) -> Self {
        let connections = Arc::new(ConnectionRegistry::new(config.max_queued_per_client));
        let tracker = Arc::new(RequestTracker::new(tracker));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(handlers), tracker, connections));
        Self {
            config: Arc::new(config),
            dispatcher,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/scopes/{scope}/registrations", get(registrations_handler))
            .route("/ws/{scope}/{client_id}", get(session_socket))
            .route("/ws/{scope}/{client_id}/{component_id}", get(component_socket))
            .with_state(state)
    }

    /// Start the retry sweep and the janitor under the shutdown token.
    pub fn start_background(&self) {
        let token = self.shutdown.token();
        self.shutdown.register(
            "retry-sweep",
            spawn_sweep(self.dispatcher.tracker().clone(), token.clone()),
        );
        self.shutdown.register(
            "janitor",
            spawn_janitor(
                self.dispatcher.connections().clone(),
                self.config.prune_interval(),
                self.config.stale_after(),
                token,
            ),
        );
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Serve HTTP and WebSocket traffic until shutdown is signalled.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "switchboard listening");
        }
        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(ServerError::Serve)
    }

    /// Signal shutdown, cancel in-flight handlers and wait for background
    /// tasks. Returns how many tasks had to be aborted.
    pub async fn shutdown_gracefully(&self, timeout: Option<Duration>) -> usize {
        self.dispatcher.tracker().shutdown();
        self.shutdown.graceful_shutdown(timeout).await
    }

    /// Envelope dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        self.dispatcher.connections()
    }

    /// Request tracker.
    pub fn tracker(&self) -> &Arc<RequestTracker> {
        self.dispatcher.tracker()
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.dispatcher.connections();
    Json(health::health_check(
        state.start_time,
        connections.active_count(),
        connections.session_count(),
        state.dispatcher.tracker().pending_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// GET /scopes/{scope}/registrations
async fn registrations_handler(
    Path(scope): Path<String>,
    State(state): State<AppState>,
) -> Json<Registrations> {
    let components = state.dispatcher.handlers().components_for_scope(&scope);
    Json(Registrations { scope, components })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::echo::EchoComponent;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> SwitchboardServer {
        let mut handlers = HandlerRegistry::new();
        handlers.install(&EchoComponent);
        SwitchboardServer::new(ServerConfig::default(), handlers, TrackerConfig::default())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_endpoint_reports_counters() {
        let server = make_server();
        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["pending_requests"], 0);
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn registrations_endpoint_lists_components() {
        let server = make_server();
        let (status, body) = get_json(server.router(), "/scopes/agent_1/registrations").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scope"], "agent_1");
        assert_eq!(body["components"][0]["id"], "echo");
    }

    #[tokio::test]
    async fn metrics_unavailable_without_recorder() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_served_with_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_rejects_plain_get() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/ws/s1/c1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn background_tasks_stop_on_shutdown() {
        let server = make_server();
        server.start_background();
        assert_eq!(server.shutdown().task_count(), 2);
        let aborted = server
            .shutdown_gracefully(Some(Duration::from_secs(5)))
            .await;
        assert_eq!(aborted, 0);
        assert!(server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn bind_port_zero() {
        let server = make_server();
        let listener = server.bind().await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
