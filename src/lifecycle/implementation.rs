//! Implementation tracking
//!
//! One active implementation per proposal, owned by the agent it is assigned
//! to. Completing the work also moves the proposal approved -> implemented
//! through the state machine.

use super::state_machine::ProposalStateMachine;
use super::{Implementation, ImplementationStatus, ProposalStatus};
use crate::error::AppError;
use crate::store::{GraphStore, ImplementationPatch, StoreError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Progress is 0..=100, only moves while work is in progress, and never
/// moves backwards
pub fn validate_progress(implementation: &Implementation, progress: u8) -> Result<(), AppError> {
    if implementation.status != ImplementationStatus::InProgress {
        return Err(AppError::InvalidTransition(format!(
            "Implementation {} is {}; progress can only change while in progress",
            implementation.id, implementation.status
        )));
    }
    if progress > 100 {
        return Err(AppError::Validation(format!(
            "progress must be between 0 and 100, got {}",
            progress
        )));
    }
    if progress < implementation.progress {
        return Err(AppError::Validation(format!(
            "progress cannot decrease from {} to {}",
            implementation.progress, progress
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ImplementationTracker {
    store: Arc<dyn GraphStore>,
    state_machine: ProposalStateMachine,
}

impl ImplementationTracker {
    pub fn new(store: Arc<dyn GraphStore>, state_machine: ProposalStateMachine) -> Self {
        Self {
            store,
            state_machine,
        }
    }

    pub async fn start(
        &self,
        proposal_id: Uuid,
        assigned_to: &str,
        notes: Option<String>,
    ) -> Result<Implementation, AppError> {
        let assigned_to = assigned_to.trim();
        if assigned_to.is_empty() {
            return Err(AppError::Validation(
                "An implementation must be assigned to someone".into(),
            ));
        }

        let proposal = self.state_machine.get_status(proposal_id).await?;
        if proposal.status != ProposalStatus::Approved {
            return Err(AppError::InvalidTransition(format!(
                "Implementation can only start on an approved proposal; proposal {} is {}",
                proposal_id, proposal.status
            )));
        }
        if let Some(active) = self.store.active_implementation(proposal_id).await? {
            return Err(AppError::Conflict(format!(
                "Proposal {} already has active implementation {} ({})",
                proposal_id, active.id, active.status
            )));
        }

        let implementation = Implementation::new(proposal_id, assigned_to.to_string(), notes);
        self.store
            .insert_implementation(&implementation)
            .await
            .map_err(|e| match e {
                StoreError::Constraint(msg) => AppError::Conflict(msg),
                other => AppError::Store(other),
            })?;
        self.store
            .set_implementation_status(proposal_id, ImplementationStatus::InProgress, Utc::now())
            .await?;

        info!(
            proposal_id = %proposal_id,
            implementation_id = %implementation.id,
            assigned_to = %implementation.assigned_to,
            "Implementation started"
        );
        Ok(implementation)
    }

    pub async fn update_progress(
        &self,
        implementation_id: Uuid,
        progress: u8,
        notes: Option<String>,
    ) -> Result<Implementation, AppError> {
        let implementation = self.get(implementation_id).await?;
        validate_progress(&implementation, progress)?;

        let patch = ImplementationPatch {
            progress: Some(progress),
            notes,
            ..Default::default()
        };
        let updated = self.patch(implementation_id, &patch).await?;
        info!(
            implementation_id = %implementation_id,
            from = implementation.progress,
            to = progress,
            "Implementation progress updated"
        );
        Ok(updated)
    }

    pub async fn complete(
        &self,
        implementation_id: Uuid,
        summary: &str,
    ) -> Result<Implementation, AppError> {
        let implementation = self.get(implementation_id).await?;
        if implementation.status != ImplementationStatus::InProgress {
            return Err(AppError::InvalidTransition(format!(
                "Implementation {} is {} and cannot be completed",
                implementation_id, implementation.status
            )));
        }

        let now = Utc::now();
        let patch = ImplementationPatch {
            status: Some(ImplementationStatus::Completed),
            summary: Some(summary.trim().to_string()),
            completed_at: Some(now),
            ..Default::default()
        };
        let updated = self.patch(implementation_id, &patch).await?;
        self.store
            .set_implementation_status(updated.proposal_id, ImplementationStatus::Completed, now)
            .await?;

        let proposal = self.state_machine.get_status(updated.proposal_id).await?;
        if proposal.status == ProposalStatus::Approved {
            self.state_machine
                .transition(
                    updated.proposal_id,
                    ProposalStatus::Implemented,
                    "implementation completed",
                    Some(serde_json::json!({ "implementationId": implementation_id })),
                )
                .await?;
        }

        info!(
            proposal_id = %updated.proposal_id,
            implementation_id = %implementation_id,
            progress = updated.progress,
            "Implementation completed"
        );
        Ok(updated)
    }

    /// Marks in-progress work failed, which frees the proposal for a fresh
    /// implementation. Completed work stays on record behind its validations.
    pub async fn fail(&self, implementation_id: Uuid, reason: &str) -> Result<Implementation, AppError> {
        let implementation = self.get(implementation_id).await?;
        if implementation.status != ImplementationStatus::InProgress {
            return Err(AppError::InvalidTransition(format!(
                "Implementation {} is {} and can no longer be failed",
                implementation_id, implementation.status
            )));
        }

        let now = Utc::now();
        let patch = ImplementationPatch {
            status: Some(ImplementationStatus::Failed),
            notes: Some(reason.trim().to_string()).filter(|r| !r.is_empty()),
            ..Default::default()
        };
        let updated = self.patch(implementation_id, &patch).await?;
        self.store
            .set_implementation_status(updated.proposal_id, ImplementationStatus::Failed, now)
            .await?;

        warn!(
            proposal_id = %updated.proposal_id,
            implementation_id = %implementation_id,
            reason = %reason,
            "Implementation failed"
        );
        Ok(updated)
    }

    pub async fn get(&self, implementation_id: Uuid) -> Result<Implementation, AppError> {
        self.store
            .get_implementation(implementation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Implementation {} not found", implementation_id))
            })
    }

    async fn patch(
        &self,
        implementation_id: Uuid,
        patch: &ImplementationPatch,
    ) -> Result<Implementation, AppError> {
        self.store
            .update_implementation(implementation_id, patch, Utc::now())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Implementation {} not found", implementation_id))
            })
    }
}
