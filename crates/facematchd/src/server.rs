//! Router, per-request log context, and serving with graceful shutdown.

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::logging::LogContext;
use crate::routes;
use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::HeaderValue;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tracing::instrument::WithSubscriber;
use tracing::Instrument;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub log: LogContext,
}

/// Build the router. `max_body_bytes` of `None` disables the body limit.
pub fn build_router(state: AppState, max_body_bytes: Option<usize>) -> Router {
    let body_limit = match max_body_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/", get(routes::root_page))
        .route("/face-recognition", post(routes::compare_faces))
        .layer(body_limit)
        .layer(from_fn_with_state(state.clone(), with_log_context))
        .with_state(state)
}

/// Run the request under the injected log context, inside a `request` span
/// carrying a correlation id that is echoed back in `x-request-id`.
async fn with_log_context(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let dispatch = state.log.dispatch().clone();
    let span = tracing::dispatcher::with_default(&dispatch, || {
        tracing::info_span!(
            "request",
            id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
        )
    });

    let mut response = next.run(request).instrument(span).with_subscriber(dispatch).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Bind the configured address and serve until Ctrl+C or SIGTERM.
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let addr = config
        .socket_addr()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;

    let app = build_router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, max_body_bytes = ?config.max_body_bytes, "facematchd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
