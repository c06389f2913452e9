//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;
use store::StoreError;
use validator::ValidationErrors;
use workflow::WorkflowError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Request body failed field validation.
    Validation(ValidationErrors),
    /// Caller identity missing or malformed.
    Unauthorized(String),
    /// Caller lacks the required role.
    Forbidden(String),
    /// Workflow error.
    Workflow(WorkflowError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Validation(errors) => (StatusCode::UNPROCESSABLE_ENTITY, errors.to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Workflow(err) => workflow_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn workflow_error_to_response(err: WorkflowError) -> (StatusCode, String) {
    let status = match &err {
        WorkflowError::EmptyCart | WorkflowError::CouponNotActive(_) => StatusCode::BAD_REQUEST,
        WorkflowError::CouponNotFound(_) | WorkflowError::OrderNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        WorkflowError::CouponExhausted(_)
        | WorkflowError::ProductUnavailable(_)
        | WorkflowError::NotEligible { .. }
        | WorkflowError::RefundNotEligible(_) => StatusCode::CONFLICT,
        WorkflowError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
        WorkflowError::UnsupportedEvent(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Gateway(_) => StatusCode::BAD_GATEWAY,
        WorkflowError::Order(OrderError::InvalidStateTransition { .. }) => StatusCode::CONFLICT,
        WorkflowError::Order(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Store(StoreError::Duplicate { .. }) => StatusCode::CONFLICT,
        WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    (status, err.to_string())
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError::Workflow(err)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        ApiError::Validation(err)
    }
}
