//! Proposal state machine
//!
//! Owns the lifecycle `status` field and its transition table. The table is a
//! pure function of the current status; the sync guardrail lives elsewhere and
//! `synced` is only reachable through the mapper's guarded write.

use super::implementation::validate_progress;
use super::{
    GuardrailViolation, ImplementationStatus, Priority, Proposal, ProposalStatus,
};
use crate::config::LifecycleConfig;
use crate::error::AppError;
use crate::store::{GraphStore, ImplementationPatch, StatusChange, StatusWrite, StoreError};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Targets reachable from `current`
pub fn allowed_targets(current: ProposalStatus) -> &'static [ProposalStatus] {
    use ProposalStatus::*;
    match current {
        Proposed => &[UnderReview, Rejected],
        UnderReview => &[Approved, Rejected, Proposed],
        Approved => &[Implemented, Rejected],
        Implemented => &[Validated, Failed],
        Validated => &[Synced],
        Synced | Rejected | Failed => &[],
    }
}

pub fn can_transition(from: ProposalStatus, to: ProposalStatus) -> bool {
    allowed_targets(from).contains(&to)
}

fn describe_targets(current: ProposalStatus) -> String {
    let targets = allowed_targets(current);
    if targets.is_empty() {
        return "none, it is terminal".to_string();
    }
    targets
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Input to [`ProposalStateMachine::create`]
#[derive(Debug, Clone, Default)]
pub struct NewProposal {
    pub opportunity_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionReceipt {
    pub proposal_id: Uuid,
    pub previous: ProposalStatus,
    pub current: ProposalStatus,
}

#[derive(Clone)]
pub struct ProposalStateMachine {
    store: Arc<dyn GraphStore>,
    config: LifecycleConfig,
}

impl ProposalStateMachine {
    pub fn new(store: Arc<dyn GraphStore>, config: LifecycleConfig) -> Self {
        Self { store, config }
    }

    pub async fn create(&self, input: NewProposal) -> Result<Proposal, AppError> {
        let title = input.title.trim();
        let description = input.description.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Proposal title must not be empty".into()));
        }
        if description.is_empty() {
            return Err(AppError::Validation(
                "Proposal description must not be empty".into(),
            ));
        }

        if let Some(opportunity_id) = input.opportunity_id {
            let opportunity = self
                .store
                .get_opportunity(opportunity_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Opportunity {} not found", opportunity_id))
                })?;
            if opportunity.status != super::OpportunityStatus::Open {
                return Err(AppError::Conflict(format!(
                    "Opportunity {} is {} and cannot evolve into a proposal",
                    opportunity_id, opportunity.status
                )));
            }
        }

        let category = input
            .category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty());
        let mut proposal = Proposal::new(
            input.opportunity_id,
            title.to_string(),
            description.to_string(),
            category,
        );
        if let Some(priority) = input.priority {
            proposal.priority = priority;
        }

        self.store
            .insert_proposal(&proposal)
            .await
            .map_err(|e| match e {
                StoreError::Constraint(msg) => AppError::Conflict(msg),
                other => AppError::Store(other),
            })?;

        info!(
            proposal_id = %proposal.id,
            opportunity_id = ?proposal.opportunity_id,
            priority = %proposal.priority,
            "Proposal created"
        );
        Ok(proposal)
    }

    /// Move a proposal along the transition table. The write only lands if the
    /// status is still the one checked against the table.
    pub async fn transition(
        &self,
        proposal_id: Uuid,
        target: ProposalStatus,
        reason: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<TransitionReceipt, AppError> {
        let proposal = self.get_status(proposal_id).await?;
        let current = proposal.status;

        if !can_transition(current, target) {
            warn!(
                proposal_id = %proposal_id,
                from = %current,
                to = %target,
                reason = %reason,
                "Rejected transition"
            );
            return Err(AppError::InvalidTransition(format!(
                "Proposal {} cannot move from {} to {} (allowed: {})",
                proposal_id,
                current,
                target,
                describe_targets(current)
            )));
        }

        if target == ProposalStatus::Synced {
            warn!(
                proposal_id = %proposal_id,
                from = %current,
                to = %target,
                "Direct transition to synced refused"
            );
            return Err(GuardrailViolation::new(
                proposal_id,
                "Direct transition to synced is not permitted",
                "publish through the guarded sync operation, which re-verifies status, implementation_status and validation evidence",
            )
            .into());
        }

        let change = StatusChange {
            expected: current,
            target,
            reason: reason.to_string(),
            metadata,
            changed_at: Utc::now(),
        };
        match self.store.change_status(proposal_id, &change).await? {
            StatusWrite::Applied => {
                info!(
                    proposal_id = %proposal_id,
                    from = %current,
                    to = %target,
                    reason = %reason,
                    "Proposal transitioned"
                );
                Ok(TransitionReceipt {
                    proposal_id,
                    previous: current,
                    current: target,
                })
            }
            StatusWrite::Stale { current: found } => {
                warn!(
                    proposal_id = %proposal_id,
                    from = %current,
                    to = %target,
                    found = %found,
                    "Transition lost a race"
                );
                Err(AppError::InvalidTransition(format!(
                    "Proposal {} changed to {} while moving from {} to {}",
                    proposal_id, found, current, target
                )))
            }
            StatusWrite::Missing => Err(not_found(proposal_id)),
        }
    }

    /// Sets `implementation_status` outside the transition table. Progress and
    /// notes, when given, go to the active implementation.
    pub async fn update_implementation_status(
        &self,
        proposal_id: Uuid,
        status: ImplementationStatus,
        progress: Option<u8>,
        notes: Option<String>,
    ) -> Result<Proposal, AppError> {
        let proposal = self.get_status(proposal_id).await?;
        if proposal.status == ProposalStatus::Synced {
            warn!(
                proposal_id = %proposal_id,
                from = %proposal.implementation_status,
                to = %status,
                "Rejected implementation status change on synced proposal"
            );
            return Err(AppError::InvalidTransition(format!(
                "Proposal {} is synced; implementation_status stays {}",
                proposal_id, proposal.implementation_status
            )));
        }

        if progress.is_some() || notes.is_some() {
            let implementation = self
                .store
                .active_implementation(proposal_id)
                .await?
                .ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "Proposal {} has no active implementation to record progress on",
                        proposal_id
                    ))
                })?;
            if implementation.status != ImplementationStatus::InProgress {
                return Err(AppError::InvalidTransition(format!(
                    "Implementation {} is {}; progress and notes can only change while in progress",
                    implementation.id, implementation.status
                )));
            }
            if let Some(progress) = progress {
                validate_progress(&implementation, progress)?;
            }
            let patch = ImplementationPatch {
                progress,
                notes,
                ..Default::default()
            };
            self.store
                .update_implementation(implementation.id, &patch, Utc::now())
                .await?;
        }

        if !self
            .store
            .set_implementation_status(proposal_id, status, Utc::now())
            .await?
        {
            return Err(not_found(proposal_id));
        }

        info!(
            proposal_id = %proposal_id,
            from = %proposal.implementation_status,
            to = %status,
            "Implementation status updated"
        );
        self.get_status(proposal_id).await
    }

    /// Proposals in `status`, priority desc then newest first. A store failure
    /// degrades to an empty list.
    pub async fn list_by_status(
        &self,
        status: ProposalStatus,
        limit: Option<usize>,
    ) -> Vec<Proposal> {
        let limit = self.config.clamp_limit(limit);
        match self.store.list_proposals_by_status(status, limit).await {
            Ok(proposals) => proposals,
            Err(e) => {
                error!(status = %status, error = %e, "Failed to list proposals");
                Vec::new()
            }
        }
    }

    pub async fn get_status(&self, proposal_id: Uuid) -> Result<Proposal, AppError> {
        self.store
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| not_found(proposal_id))
    }
}

fn not_found(proposal_id: Uuid) -> AppError {
    AppError::NotFound(format!("Proposal {} not found", proposal_id))
}
