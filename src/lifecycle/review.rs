//! Reviewer vettings
//!
//! Each review cycle appends a new vetting; earlier ones are kept, including
//! across an under_review -> proposed send-back.

use super::{Priority, ProposalStatus, Recommendation, Vetting};
use crate::error::AppError;
use crate::store::GraphStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewVetting {
    pub assessor: String,
    pub operational_impact: String,
    pub deployment_risk: Priority,
    pub rollout_strategy: String,
    pub recommendation: Recommendation,
}

#[derive(Clone)]
pub struct ReviewService {
    store: Arc<dyn GraphStore>,
}

impl ReviewService {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn record_vetting(
        &self,
        proposal_id: Uuid,
        input: NewVetting,
    ) -> Result<Vetting, AppError> {
        let assessor = input.assessor.trim();
        if assessor.is_empty() {
            return Err(AppError::Validation("Vetting assessor must not be empty".into()));
        }

        let proposal = self
            .store
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", proposal_id)))?;
        if !matches!(
            proposal.status,
            ProposalStatus::Proposed | ProposalStatus::UnderReview
        ) {
            return Err(AppError::InvalidTransition(format!(
                "Proposal {} is {}; vettings are only recorded while proposed or under review",
                proposal_id, proposal.status
            )));
        }

        let vetting = Vetting {
            id: Uuid::new_v4(),
            proposal_id,
            assessor: assessor.to_string(),
            operational_impact: input.operational_impact,
            deployment_risk: input.deployment_risk,
            rollout_strategy: input.rollout_strategy,
            recommendation: input.recommendation,
            created_at: Utc::now(),
        };
        self.store.insert_vetting(&vetting).await?;

        info!(
            proposal_id = %proposal_id,
            vetting_id = %vetting.id,
            recommendation = %vetting.recommendation,
            deployment_risk = %vetting.deployment_risk,
            "Vetting recorded"
        );
        Ok(vetting)
    }

    /// Newest first
    pub async fn vettings(&self, proposal_id: Uuid) -> Result<Vec<Vetting>, AppError> {
        Ok(self.store.list_vettings(proposal_id).await?)
    }
}
