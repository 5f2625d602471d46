//! Opportunity routes

use crate::error::ApiResult;
use crate::lifecycle::{NewOpportunity, Opportunity, Priority};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOpportunityRequest {
    #[validate(length(min = 1, max = 64, message = "Kind must be between 1 and 64 characters"))]
    pub kind: String,
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    pub priority: Option<String>,
    #[validate(length(min = 1, message = "proposedBy is required"))]
    pub proposed_by: String,
    pub target_section: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpportunityListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityResponse {
    pub opportunity: Opportunity,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityListResponse {
    pub count: usize,
    pub opportunities: Vec<Opportunity>,
}

/// Record an improvement opportunity
pub async fn create_opportunity(
    State(state): State<SharedState>,
    Json(payload): Json<CreateOpportunityRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<OpportunityResponse>>)> {
    payload.validate()?;
    let priority = payload
        .priority
        .as_deref()
        .map(str::parse::<Priority>)
        .transpose()?;

    let opportunity = state
        .lifecycle
        .opportunities
        .record(NewOpportunity {
            kind: payload.kind,
            description: payload.description,
            priority,
            proposed_by: payload.proposed_by,
            target_section: payload.target_section,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Opportunity recorded",
            OpportunityResponse { opportunity },
        )),
    ))
}

/// Open opportunities, highest priority first
pub async fn list_open_opportunities(
    State(state): State<SharedState>,
    Query(query): Query<OpportunityListQuery>,
) -> ApiResult<Json<SuccessResponse<OpportunityListResponse>>> {
    let opportunities = state.lifecycle.opportunities.open(query.limit).await;
    Ok(Json(SuccessResponse::with_data(
        format!("Found {} open opportunities", opportunities.len()),
        OpportunityListResponse {
            count: opportunities.len(),
            opportunities,
        },
    )))
}
