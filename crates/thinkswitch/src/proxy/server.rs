//! HTTP proxy server in front of a single OpenAI-compatible backend
//!
//! Routes:
//! - `POST /v1/chat/completions`, `POST /v1/completions`: rewritten for the
//!   requested virtual model, responses repaired on the way back
//! - `GET /v1/models`: backend listing re-labelled with the virtual names
//! - `GET /health`: local status and counters
//! - everything else: forwarded unchanged

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Response, header},
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{Result, ThinkswitchError};
use crate::registry::ModelRegistry;

use super::error::{ProxyError, handle_proxy_error};
use super::models::list_models;
use super::passthrough::forward_passthrough;
use super::rectify::ResponseRectifier;
use super::stats::ProxyStats;
use super::streaming::{ReframeStream, SseReframer};
use super::transform::RequestTransformer;
use super::upstream::{UpstreamClient, response_headers};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state for all handlers
pub struct AppState {
    /// Rewrites completion bodies
    pub transformer: RequestTransformer,
    /// Repairs buffered completion responses
    pub rectifier: ResponseRectifier,
    /// Pooled client for the backend
    pub upstream: UpstreamClient,
    /// Request counters reported by `/health`
    pub stats: Arc<ProxyStats>,
    /// Byte budget for an incomplete SSE event
    pub stream_watermark: usize,
}

impl AppState {
    pub fn from_config(config: &Config, registry: Arc<ModelRegistry>) -> Result<Self> {
        let stats = Arc::new(ProxyStats::new());
        let upstream = UpstreamClient::new(
            config.backend_url()?,
            Duration::from_secs(config.proxy.connect_timeout_secs),
        )?;

        Ok(Self {
            transformer: RequestTransformer::new(
                registry,
                config.sampling.policy(),
                Arc::clone(&stats),
            ),
            rectifier: ResponseRectifier::new(config.rectifier.fix_misplaced_content),
            upstream,
            stats,
            stream_watermark: config.rectifier.stream_watermark_bytes,
        })
    }
}

/// The main proxy server
pub struct ProxyServer {
    config: Config,
    registry: Arc<ModelRegistry>,
}

impl ProxyServer {
    pub fn new(config: Config, registry: Arc<ModelRegistry>) -> Self {
        Self { config, registry }
    }

    /// Start the proxy server and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let state = Arc::new(AppState::from_config(&self.config, Arc::clone(&self.registry))?);
        let app = create_router(state);

        let addr = self.config.listen_addr()?;
        let grace = Duration::from_secs(self.config.proxy.shutdown_grace_secs);

        tracing::info!("Starting proxy server on {addr}");
        tracing::info!("Backend: {}", self.config.proxy.backend_url);
        tracing::info!("Served model: {}", self.registry.served_model());
        for model in self.registry.models() {
            tracing::info!(
                kind = model.kind.as_str(),
                thinking = model.thinking,
                "Virtual model: {}",
                model.name
            );
        }
        tracing::info!(
            enforce = self.config.sampling.enforce,
            "Sampling parameter policy"
        );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ThinkswitchError::Proxy(format!("Failed to bind to {addr}: {e}")))?;

        serve_with_grace(listener, app, shutdown_signal(), grace).await
    }
}

/// Serve `app` until `signal` resolves, then drain for at most `grace`
///
/// New connections stop being accepted as soon as the signal fires. Requests
/// still running when the grace period ends are dropped.
pub async fn serve_with_grace<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => return server_result(result),
        _ = signal => {}
    }

    tracing::info!(
        grace_period_secs = grace.as_secs(),
        "Waiting for in-flight requests to finish"
    );
    let _ = stop_tx.send(());

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => server_result(result)?,
        Err(_) => {
            tracing::warn!("Grace period elapsed, dropping open connections");
            server.abort();
        }
    }

    tracing::info!("Proxy server shut down");
    Ok(())
}

fn server_result(
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ThinkswitchError::Proxy(format!("Server error: {e}"))),
        Err(e) => Err(ThinkswitchError::Proxy(format!("Server task failed: {e}"))),
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/v1/chat/completions",
            post(completion_handler).fallback(passthrough_handler),
        )
        .route(
            "/v1/completions",
            post(completion_handler).fallback(passthrough_handler),
        )
        .route(
            "/v1/models",
            get(models_handler).fallback(passthrough_handler),
        )
        .fallback(passthrough_handler)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "request",
                            method = %request.method(),
                            path = request.uri().path(),
                            request_id = request_id(request.headers()),
                        )
                    }),
                )
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Health check endpoint with request counters
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "modified_requests": state.stats.modified_requests(),
        "proxied_requests": state.stats.proxied_requests(),
    }))
}

async fn completion_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response<Body> {
    let request_id = request_id(request.headers()).to_string();
    match proxy_completion(&state, request).await {
        Ok(response) => response,
        Err(e) => handle_proxy_error(e, &request_id),
    }
}

async fn models_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response<Body> {
    let request_id = request_id(request.headers()).to_string();
    let registry = state.transformer.registry();
    match list_models(&state.upstream, registry, &state.stats, request).await {
        Ok(response) => response,
        Err(e) => handle_proxy_error(e, &request_id),
    }
}

async fn passthrough_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response<Body> {
    let request_id = request_id(request.headers()).to_string();
    match forward_passthrough(&state.upstream, &state.stats, request).await {
        Ok(response) => response,
        Err(e) => handle_proxy_error(e, &request_id),
    }
}

/// Rewrite a completion request, send it, and repair what comes back
async fn proxy_completion(
    state: &AppState,
    request: Request<Body>,
) -> std::result::Result<Response<Body>, ProxyError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::Internal(format!("failed to read request body: {e}")))?;

    let transformed = state.transformer.transform(&body)?;

    // The response is parsed on the way back, so ask for it uncompressed
    let mut headers = parts.headers;
    headers.remove(header::ACCEPT_ENCODING);

    let response = state
        .upstream
        .send(
            parts.method,
            parts.uri.path(),
            parts.uri.query(),
            &headers,
            transformed.body,
        )
        .await?;
    state.stats.record_proxied();

    let status = response.status();
    let headers = response_headers(response.headers(), true);

    let body = if transformed.stream {
        tracing::debug!(status = %status, "Streaming response from backend");
        let reframer = SseReframer::new(transformed.model.name, state.stream_watermark);
        Body::from_stream(ReframeStream::new(Box::pin(response.bytes_stream()), reframer))
    } else {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Internal(format!("failed to read backend response: {e}")))?;
        Body::from(state.rectifier.rectify(bytes, &transformed.model))
    };

    let mut out = Response::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    Ok(out)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
