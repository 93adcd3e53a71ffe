//! Maps [`EngineError`] to the HTTP status codes the route table commits
//! to, keeping `enq-core` itself free of any HTTP dependency.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use enq_core::EngineError;
use serde_json::json;

/// The only error type a handler returns. Validation failures never reach
/// the coordinator (spec §7): they're rejected here, before `EngineError`
/// is even in the picture.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Engine(err) => {
                let status = match &err {
                    EngineError::Duplicate { .. } => StatusCode::CONFLICT,
                    EngineError::NotFound => StatusCode::NOT_FOUND,
                    EngineError::NotQueued => StatusCode::CONFLICT,
                    EngineError::PreconditionFailed => StatusCode::CONFLICT,
                    EngineError::LeaseLost => StatusCode::GONE,
                    EngineError::NotOwned => StatusCode::CONFLICT,
                    EngineError::StorageUnavailable(_) | EngineError::BrokerUnavailable(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    EngineError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };

                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "engine error surfaced to API caller");
                }

                let mut body = json!({ "error": err.safe_message() });
                if let EngineError::Duplicate { existing_id } = &err {
                    body["existingId"] = json!(existing_id);
                }

                (status, Json(body)).into_response()
            }
        }
    }
}
