//! Proposal routes
//!
//! Lifecycle, review, section and sync endpoints keyed by proposal id.

use crate::error::{validation_error, ApiResult};
use crate::lifecycle::mapper::classify;
use crate::lifecycle::{
    GuardrailViolation, ImplementationStatus, NewProposal, NewVetting, Priority, Proposal,
    ProposalDetail, ProposalStatus, SyncDecision, SyncOutcome, TransitionReceipt, Vetting,
};
use super::implementation::ImplementationResponse;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    pub opportunity_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize)]
pub struct ProposalListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub target: String,
    #[validate(length(min = 1, message = "A reason is required for every transition"))]
    pub reason: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationStatusRequest {
    pub status: String,
    #[validate(range(max = 100, message = "Progress must be between 0 and 100"))]
    pub progress: Option<u8>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VettingRequest {
    #[validate(length(min = 1, message = "Assessor is required"))]
    pub assessor: String,
    pub operational_impact: String,
    pub deployment_risk: String,
    pub rollout_strategy: String,
    pub recommendation: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartImplementationRequest {
    #[validate(length(min = 1, message = "assignedTo is required"))]
    pub assigned_to: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Defaults to the proposal's classified section
    pub section_title: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalResponse {
    pub proposal: Proposal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalListResponse {
    pub status: ProposalStatus,
    pub count: usize,
    pub proposals: Vec<Proposal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub transition: TransitionReceipt,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VettingResponse {
    pub vetting: Vetting,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailResponse {
    pub proposal_id: Uuid,
    pub allowed: bool,
    pub reason: String,
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Create a proposal, optionally evolved from an opportunity
pub async fn create_proposal(
    State(state): State<SharedState>,
    Json(payload): Json<CreateProposalRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<ProposalResponse>>)> {
    payload.validate()?;

    let proposal = state
        .lifecycle
        .state_machine
        .create(NewProposal {
            opportunity_id: payload.opportunity_id,
            title: payload.title,
            description: payload.description,
            category: payload.category,
            priority: payload.priority,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data("Proposal created", ProposalResponse { proposal })),
    ))
}

/// List proposals in one lifecycle status
pub async fn list_proposals(
    State(state): State<SharedState>,
    Query(query): Query<ProposalListQuery>,
) -> ApiResult<Json<SuccessResponse<ProposalListResponse>>> {
    let status = match query.status.as_deref() {
        Some(raw) => raw.parse::<ProposalStatus>()?,
        None => ProposalStatus::Proposed,
    };
    let proposals = state
        .lifecycle
        .state_machine
        .list_by_status(status, query.limit)
        .await;

    Ok(Json(SuccessResponse::with_data(
        format!("{} proposals", status),
        ProposalListResponse {
            status,
            count: proposals.len(),
            proposals,
        },
    )))
}

pub async fn get_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    let proposal = state.lifecycle.state_machine.get_status(id).await?;
    Ok(Json(SuccessResponse::with_data(
        "Proposal retrieved",
        ProposalResponse { proposal },
    )))
}

/// Proposal with its vettings, implementation, validations and sync link
pub async fn get_proposal_detail(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ProposalDetail>>> {
    let detail = state.lifecycle.reporting.proposal_detail(id).await?;
    Ok(Json(SuccessResponse::with_data("Proposal detail", detail)))
}

pub async fn transition_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> ApiResult<Json<SuccessResponse<TransitionResponse>>> {
    payload.validate()?;
    let target: ProposalStatus = payload.target.parse()?;

    let transition = state
        .lifecycle
        .state_machine
        .transition(id, target, &payload.reason, payload.metadata)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Proposal moved from {} to {}", transition.previous, transition.current),
        TransitionResponse { transition },
    )))
}

pub async fn update_implementation_status(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ImplementationStatusRequest>,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    payload.validate()?;
    let status: ImplementationStatus = payload.status.parse()?;

    let proposal = state
        .lifecycle
        .state_machine
        .update_implementation_status(id, status, payload.progress, payload.notes)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Implementation status updated",
        ProposalResponse { proposal },
    )))
}

// =============================================================================
// REVIEW & BUILD
// =============================================================================

pub async fn record_vetting(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VettingRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<VettingResponse>>)> {
    payload.validate()?;

    let vetting = state
        .lifecycle
        .reviews
        .record_vetting(
            id,
            NewVetting {
                assessor: payload.assessor,
                operational_impact: payload.operational_impact,
                deployment_risk: payload.deployment_risk.parse()?,
                rollout_strategy: payload.rollout_strategy,
                recommendation: payload.recommendation.parse()?,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data("Vetting recorded", VettingResponse { vetting })),
    ))
}

pub async fn start_implementation(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartImplementationRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<ImplementationResponse>>)> {
    payload.validate()?;

    let implementation = state
        .lifecycle
        .implementations
        .start(id, &payload.assigned_to, payload.notes)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Implementation started",
            ImplementationResponse { implementation },
        )),
    ))
}

// =============================================================================
// SECTION & SYNC
// =============================================================================

pub async fn assign_section(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    let proposal = state.lifecycle.mapper.assign_section(id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!(
            "Section assigned: {}",
            proposal.target_section.as_deref().unwrap_or_default()
        ),
        ProposalResponse { proposal },
    )))
}

pub async fn check_can_sync(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<SyncDecision>>> {
    let decision = state.lifecycle.mapper.check_can_sync(id).await?;
    Ok(Json(SuccessResponse::with_data("Sync guardrail evaluated", decision)))
}

/// Publish the proposal. A refusal is returned as a guardrail violation.
pub async fn mark_synced(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SyncRequest>,
) -> ApiResult<Json<SuccessResponse<SyncOutcome>>> {
    let section_title = match payload.section_title {
        Some(title) if !title.trim().is_empty() => title,
        Some(_) => return Err(validation_error("sectionTitle must not be blank")),
        None => {
            // Classified in place; a refused sync must leave the proposal untouched
            let current = state.lifecycle.state_machine.get_status(id).await?;
            current
                .target_section
                .unwrap_or_else(|| classify(&current.title, &current.description).to_string())
        }
    };

    let outcome = state.lifecycle.mapper.mark_synced(id, &section_title).await?;
    if !outcome.allowed {
        return Err(GuardrailViolation::new(id, "Sync refused by guardrail", outcome.reason).into());
    }

    let message = if outcome.already_synced {
        "Proposal was already synced"
    } else {
        "Proposal synced"
    };
    Ok(Json(SuccessResponse::with_data(message, outcome)))
}

/// Deep guardrail check including validation evidence
pub async fn guardrail_check(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<GuardrailResponse>>> {
    // Surface NotFound instead of folding it into the reason
    state.lifecycle.state_machine.get_status(id).await?;
    let (allowed, reason) = state.lifecycle.enforcer.check(id).await;
    Ok(Json(SuccessResponse::with_data(
        "Guardrail enforcer evaluated",
        GuardrailResponse {
            proposal_id: id,
            allowed,
            reason,
        },
    )))
}
