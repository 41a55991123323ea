//! HTTP front for the execution dispatcher.
//!
//! Exposes exactly two endpoints: `POST /execute`, which validates the
//! request at the front door and hands it to the dispatcher, and
//! `GET /health`, which stays cheap — it reads the limiter gauges and the
//! registry snapshot, never the network. Every execution outcome travels
//! as HTTP 200 with the status inside the payload; only validation
//! failures produce 4xx.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use donfra_runner_core::{ExecuteRequest, ExecuteResult, Runner};

/// Configuration for the HTTP front.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address.
    pub bind_addr: SocketAddr,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// How long in-flight requests get to drain after a shutdown signal.
    pub drain_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".parse().unwrap(),
            max_body_size: 1024 * 1024,
            drain_grace: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    languages: Vec<i32>,
    version: &'static str,
    slots: SlotsSnapshot,
}

#[derive(Serialize)]
struct SlotsSnapshot {
    max: usize,
    in_use: usize,
    queued: usize,
}

#[derive(Clone)]
struct AppState {
    runner: Arc<Runner>,
}

/// Handler for the /execute POST endpoint.
async fn execute_handler(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResult>, (StatusCode, Json<Value>)> {
    let Json(req) = payload.map_err(|_| bad_request("invalid request body"))?;

    // Defense in depth: the dispatcher validates too, but rejecting here
    // answers with a 4xx instead of an in-payload status.
    if req.source_code.is_empty() {
        return Err(bad_request("source_code is required"));
    }
    if req.language_id == 0 {
        return Err(bad_request("language_id is required"));
    }
    if let Err(err) = state.runner.languages().lookup(req.language_id) {
        return Err(bad_request(err.to_string()));
    }

    let language_id = req.language_id;
    let result = state.runner.execute(req).await;

    log::info!(
        "execute lang={} status={} duration={}ms stdout_len={} stderr_len={}",
        language_id,
        result.status.id,
        result.execution_time_ms,
        result.stdout.len(),
        result.stderr.len()
    );

    Ok(Json(result))
}

/// Handler for the /health GET endpoint.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let limiter = state.runner.limiter();
    Json(HealthResponse {
        status: "ok",
        languages: state.runner.languages().supported_ids(),
        version: env!("CARGO_PKG_VERSION"),
        slots: SlotsSnapshot {
            max: limiter.max(),
            in_use: limiter.in_use(),
            queued: limiter.queued(),
        },
    })
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into() })))
}

/// The runner HTTP server.
pub struct RunnerServer {
    runner: Arc<Runner>,
    config: ServerConfig,
}

impl RunnerServer {
    pub fn new(runner: Arc<Runner>) -> Self {
        Self {
            runner,
            config: ServerConfig::default(),
        }
    }

    pub fn with_config(runner: Arc<Runner>, config: ServerConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with both routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            runner: Arc::clone(&self.runner),
        };
        Router::new()
            .route("/execute", post(execute_handler))
            .route("/health", get(health_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until the shutdown future resolves, then stop accepting new
    /// connections and give in-flight requests the drain grace period.
    /// In-flight executions are never cancelled; they finish or time out
    /// on their own.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let grace = self.config.drain_grace;
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        log::info!("listening on {}", self.config.bind_addr);

        let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
        let server = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                log::info!("shutdown signal received, draining in-flight requests");
                let _ = drain_tx.send(());
            })
            .into_future();

        tokio::select! {
            result = server => result,
            _ = async {
                let _ = drain_rx.await;
                tokio::time::sleep(grace).await;
            } => {
                log::warn!("drain grace period of {grace:?} expired, exiting");
                Ok(())
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("received SIGTERM, shutting down...");
        },
    }
}

/// Parses a listen address, accepting the bare `:port` shorthand.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    if let Some(port) = addr.strip_prefix(':') {
        return format!("0.0.0.0:{port}").parse();
    }
    addr.parse()
}
