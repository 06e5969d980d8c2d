//! API Error Handling
//!
//! Unified error type and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use sluice_core::error::OrchestrationError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        // Resolution failures never reach this layer: the sink logs and
        // swallows them. Only an unparseable payload is the sender's fault.
        match err {
            OrchestrationError::Payload(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_payload_errors_map_to_bad_request() {
        let err = OrchestrationError::Payload("bad json".to_string());
        assert!(matches!(ApiError::from(err), ApiError::BadRequest(_)));

        for err in [
            OrchestrationError::Admission("create failed".to_string()),
            OrchestrationError::Cluster("api unreachable".to_string()),
            OrchestrationError::NotFound("no definition".to_string()),
        ] {
            assert!(matches!(ApiError::from(err), ApiError::InternalError(_)));
        }
    }
}
