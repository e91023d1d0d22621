use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use synth_core::error::CoreError;
use synth_db::StoreError;
use synth_pipeline::EngineError;
use synth_vendor::VendorError;

/// Application-level error type for HTTP handlers.
///
/// Wraps domain, store and engine errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Store(err) => classify_store_error(err),
            AppError::Engine(err) => match err {
                EngineError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                EngineError::Vendor(VendorError::Permanent(reason)) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "VENDOR_REJECTED",
                    reason.clone(),
                ),
                EngineError::Vendor(VendorError::Transient(reason)) => {
                    tracing::warn!(error = %reason, "Vendor unavailable during submission");
                    (
                        StatusCode::BAD_GATEWAY,
                        "VENDOR_UNAVAILABLE",
                        "The generation service is temporarily unavailable".to_string(),
                    )
                }
                EngineError::Store(store) => classify_store_error(store),
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

/// Classify a store error into an HTTP status, error code, and message.
///
/// Details of database and decode failures are logged, never returned.
fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Task with id {id} not found"),
        ),
        StoreError::Duplicate(id) => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Task {id} already exists"),
        ),
        other => {
            tracing::error!(error = %other, "Store error");
            internal()
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
