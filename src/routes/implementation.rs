//! Implementation routes
//!
//! Progress, completion and validation of a proposal's build record.

use crate::error::ApiResult;
use crate::lifecycle::{Implementation, ValidationReport};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    #[validate(range(max = 100, message = "Progress must be between 0 and 100"))]
    pub progress: u8,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CompleteRequest {
    #[validate(length(min = 1, message = "A completion summary is required"))]
    pub summary: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FailRequest {
    #[validate(length(min = 1, message = "A failure reason is required"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationResponse {
    pub implementation: Implementation,
}

pub async fn update_progress(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProgressRequest>,
) -> ApiResult<Json<SuccessResponse<ImplementationResponse>>> {
    payload.validate()?;

    let implementation = state
        .lifecycle
        .implementations
        .update_progress(id, payload.progress, payload.notes)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Progress at {}%", implementation.progress),
        ImplementationResponse { implementation },
    )))
}

/// Complete the build; the proposal moves to implemented
pub async fn complete_implementation(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> ApiResult<Json<SuccessResponse<ImplementationResponse>>> {
    payload.validate()?;

    let implementation = state
        .lifecycle
        .implementations
        .complete(id, &payload.summary)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Implementation completed",
        ImplementationResponse { implementation },
    )))
}

pub async fn fail_implementation(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FailRequest>,
) -> ApiResult<Json<SuccessResponse<ImplementationResponse>>> {
    payload.validate()?;

    let implementation = state
        .lifecycle
        .implementations
        .fail(id, &payload.reason)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Implementation marked failed",
        ImplementationResponse { implementation },
    )))
}

/// Run the check suite and record a validation
pub async fn validate_implementation(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ValidationReport>>> {
    let report = state.lifecycle.validator.validate_implementation(id).await?;
    let message = if report.validation.passed {
        "Validation passed"
    } else {
        "Validation failed"
    };
    Ok(Json(SuccessResponse::with_data(message, report)))
}

pub async fn revalidate_implementation(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ValidationReport>>> {
    let report = state.lifecycle.validator.revalidate(id).await?;
    let message = if report.validation.passed {
        "Revalidation passed"
    } else {
        "Revalidation failed"
    };
    Ok(Json(SuccessResponse::with_data(message, report)))
}
