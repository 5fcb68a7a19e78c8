use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use jobba_core::{EngineError, RegistryError};

pub fn registry_error_to_response(err: RegistryError) -> Response {
    match err {
        RegistryError::UnknownTask(e) => json_error(StatusCode::NOT_FOUND, "unknown_task", e.to_string()),
        RegistryError::Engine(e) => engine_error_to_response(e),
    }
}

pub fn engine_error_to_response(err: EngineError) -> Response {
    let message = err.to_string();
    match err {
        EngineError::JobNotFound(_) | EngineError::JobRemoved(_) => {
            json_error(StatusCode::NOT_FOUND, "job_not_found", message)
        }
        EngineError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
        EngineError::Unavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "engine_unavailable", message)
        }
        EngineError::Payload(_) => json_error(StatusCode::BAD_REQUEST, "invalid_payload", message),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
