//! Error handling module
//!
//! Provides the unified error taxonomy for the lifecycle service. Expected
//! outcomes (`InvalidTransition`, `GuardrailViolation`) travel the same path as
//! infrastructure failures so callers always receive a structured
//! `{success: false, ...}` body with a human-readable reason.

use crate::lifecycle::{GuardrailViolation, UnknownVariant};
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Guardrail violation: {0}")]
    GuardrailViolation(#[from] GuardrailViolation),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the variant
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::GuardrailViolation(_) => "GUARDRAIL_VIOLATION",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl From<UnknownVariant> for AppError {
    fn from(err: UnknownVariant) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            AppError::GuardrailViolation(violation) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                violation.message.clone(),
                Some(violation.reason.clone()),
            ),
            AppError::Store(e) => {
                error!("Store error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The proposal store is unavailable".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_guardrail_violation_maps_to_unprocessable() {
        let err = AppError::from(GuardrailViolation::new(
            Uuid::nil(),
            "Sync refused",
            "implementation_status=in_progress",
        ));
        assert_eq!(err.code(), "GUARDRAIL_VIOLATION");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_invalid_transition_maps_to_conflict() {
        let response = AppError::InvalidTransition("proposed -> synced".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_unknown_variant_is_bad_request() {
        let err: AppError = "shipped".parse::<crate::lifecycle::ProposalStatus>().unwrap_err().into();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(validation_error("x").into_response().status(), StatusCode::BAD_REQUEST);
    }
}
