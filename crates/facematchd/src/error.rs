use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::backtrace::{Backtrace, BacktraceStatus};

/// Body text for every processing failure; causes are only logged.
pub const GENERIC_ERROR: &str = "An error occurred while processing the request.";

/// The single error boundary of the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A required upload part was not sent.
    #[error("missing form field: {0}")]
    MissingPart(&'static str),

    /// Upload reading, decoding, detection, encoding or comparison failed.
    ///
    /// `stack` is the trace of where the failure happened: the engine
    /// thread's for matching failures, the handler's otherwise.
    #[error("{error}")]
    Processing { error: anyhow::Error, stack: String },
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let stack = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<EngineError>())
            .and_then(EngineError::stack)
            .map(str::to_owned)
            .unwrap_or_else(capture_stack);
        ApiError::Processing { error, stack }
    }
}

/// Render the current stack, whether or not `RUST_BACKTRACE` is set.
pub fn capture_stack() -> String {
    let backtrace = Backtrace::force_capture();
    match backtrace.status() {
        BacktraceStatus::Captured => backtrace.to_string(),
        _ => "<stack trace unavailable>".to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingPart(field) => {
                tracing::warn!(field, "rejected request without required upload part");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "error": format!("missing form field: {field}") })),
                )
                    .into_response()
            }
            ApiError::Processing { error, stack } => {
                tracing::error!("{GENERIC_ERROR}\n{error:?}\nstack backtrace:\n{stack}");
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": GENERIC_ERROR })),
                )
                    .into_response()
            }
        }
    }
}
