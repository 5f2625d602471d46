//! Reporting and audit routes

use crate::error::ApiResult;
use crate::lifecycle::{GuardrailFinding, LifecycleSummary, Proposal, WorkQueue};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyToSyncResponse {
    pub count: usize,
    pub proposals: Vec<Proposal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationsResponse {
    pub count: usize,
    pub violations: Vec<GuardrailFinding>,
}

/// Validated proposals that are not yet published
pub async fn ready_to_sync(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<ReadyToSyncResponse>>> {
    let proposals = state.lifecycle.mapper.ready_to_sync().await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} proposals ready to sync", proposals.len()),
        ReadyToSyncResponse {
            count: proposals.len(),
            proposals,
        },
    )))
}

/// Published proposals whose records no longer back the sync
pub async fn guardrail_violations(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<ViolationsResponse>>> {
    let violations = state.lifecycle.reporting.guardrail_violations().await?;
    let message = if violations.is_empty() {
        "No guardrail violations".to_string()
    } else {
        format!("{} guardrail violations found", violations.len())
    };
    Ok(Json(SuccessResponse::with_data(
        message,
        ViolationsResponse {
            count: violations.len(),
            violations,
        },
    )))
}

pub async fn summary(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<LifecycleSummary>>> {
    let summary = state.lifecycle.reporting.summary().await?;
    Ok(Json(SuccessResponse::with_data("Lifecycle summary", summary)))
}

pub async fn work_queue(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<WorkQueue>>> {
    let queue = state.lifecycle.reporting.work_queue().await?;
    Ok(Json(SuccessResponse::with_data("Work queue", queue)))
}
