//! Read-only reporting over the lifecycle store

use super::guardrail::{GuardrailEnforcer, GuardrailFinding};
use super::{
    Implementation, ImplementationStatus, OpportunityStatus, Proposal, ProposalStatus, SyncLink,
    Validation, Vetting,
};
use crate::error::AppError;
use crate::store::GraphStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSummary {
    pub total_proposals: usize,
    pub by_status: BTreeMap<ProposalStatus, usize>,
    pub by_implementation_status: BTreeMap<ImplementationStatus, usize>,
    pub open_opportunities: usize,
    pub ready_to_sync: usize,
}

/// Proposals bucketed by who has to act next
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkQueue {
    pub awaiting_review: Vec<Proposal>,
    pub awaiting_implementation: Vec<Proposal>,
    pub in_progress: Vec<Proposal>,
    pub awaiting_validation: Vec<Proposal>,
    pub ready_to_sync: Vec<Proposal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalDetail {
    pub proposal: Proposal,
    pub vettings: Vec<Vetting>,
    pub implementation: Option<Implementation>,
    /// Validations of the active implementation, newest first
    pub validations: Vec<Validation>,
    pub sync_link: Option<SyncLink>,
}

#[derive(Clone)]
pub struct ReportingService {
    store: Arc<dyn GraphStore>,
    enforcer: GuardrailEnforcer,
}

impl ReportingService {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            enforcer: GuardrailEnforcer::new(store.clone()),
            store,
        }
    }

    pub async fn summary(&self) -> Result<LifecycleSummary, AppError> {
        let proposals = self.store.list_proposals().await?;

        let mut by_status: BTreeMap<ProposalStatus, usize> =
            ProposalStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_implementation_status: BTreeMap<ImplementationStatus, usize> =
            ImplementationStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for proposal in &proposals {
            *by_status.entry(proposal.status).or_default() += 1;
            *by_implementation_status
                .entry(proposal.implementation_status)
                .or_default() += 1;
        }

        let open_opportunities = self
            .store
            .list_opportunities(OpportunityStatus::Open, usize::MAX)
            .await?
            .len();
        let ready_to_sync = self.store.list_ready_to_sync().await?.len();

        Ok(LifecycleSummary {
            total_proposals: proposals.len(),
            by_status,
            by_implementation_status,
            open_opportunities,
            ready_to_sync,
        })
    }

    pub async fn work_queue(&self) -> Result<WorkQueue, AppError> {
        let mut queue = WorkQueue::default();

        for proposal in self.store.list_proposals().await? {
            use ImplementationStatus as Impl;
            use ProposalStatus as Status;

            let building = matches!(proposal.status, Status::Approved | Status::Implemented);
            match (proposal.status, proposal.implementation_status) {
                (Status::Proposed | Status::UnderReview, _) => queue.awaiting_review.push(proposal),
                (Status::Approved, Impl::NotStarted | Impl::Failed) => {
                    queue.awaiting_implementation.push(proposal)
                }
                (_, Impl::InProgress) if building => queue.in_progress.push(proposal),
                (_, Impl::Completed) if building => queue.awaiting_validation.push(proposal),
                _ => {}
            }
        }
        queue.ready_to_sync = self.store.list_ready_to_sync().await?;

        Ok(queue)
    }

    pub async fn proposal_detail(&self, proposal_id: Uuid) -> Result<ProposalDetail, AppError> {
        let proposal = self
            .store
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", proposal_id)))?;

        let vettings = self.store.list_vettings(proposal_id).await?;
        let implementation = self.store.active_implementation(proposal_id).await?;
        let validations = match &implementation {
            Some(i) => self.store.list_validations(i.id).await?,
            None => Vec::new(),
        };
        let sync_link = self.store.get_sync_link(proposal_id).await?;

        Ok(ProposalDetail {
            proposal,
            vettings,
            implementation,
            validations,
            sync_link,
        })
    }

    pub async fn guardrail_violations(&self) -> Result<Vec<GuardrailFinding>, AppError> {
        self.enforcer.audit_guardrail_violations().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Opportunity, Priority};
    use crate::store::MemoryGraphStore;
    use pretty_assertions::assert_eq;

    async fn seeded() -> (Arc<MemoryGraphStore>, Vec<Proposal>) {
        let store = Arc::new(MemoryGraphStore::new());
        let states = [
            (ProposalStatus::Proposed, ImplementationStatus::NotStarted),
            (ProposalStatus::UnderReview, ImplementationStatus::NotStarted),
            (ProposalStatus::Approved, ImplementationStatus::NotStarted),
            (ProposalStatus::Approved, ImplementationStatus::InProgress),
            (ProposalStatus::Implemented, ImplementationStatus::Completed),
            (ProposalStatus::Validated, ImplementationStatus::Validated),
            (ProposalStatus::Rejected, ImplementationStatus::NotStarted),
        ];
        let mut proposals = Vec::new();
        for (i, (status, implementation_status)) in states.into_iter().enumerate() {
            let mut proposal = Proposal::new(None, format!("p{}", i), "d".into(), None);
            proposal.status = status;
            proposal.implementation_status = implementation_status;
            store.insert_proposal(&proposal).await.unwrap();
            proposals.push(proposal);
        }
        (store, proposals)
    }

    fn titles(list: &[Proposal]) -> Vec<&str> {
        let mut titles: Vec<&str> = list.iter().map(|p| p.title.as_str()).collect();
        titles.sort();
        titles
    }

    #[tokio::test]
    async fn test_summary_counts_every_status() {
        let (store, _) = seeded().await;
        store
            .insert_opportunity(&Opportunity::new(
                "performance".into(),
                "slow".into(),
                Priority::Low,
                "detector".into(),
                None,
            ))
            .await
            .unwrap();

        let summary = ReportingService::new(store).summary().await.unwrap();
        assert_eq!(summary.total_proposals, 7);
        assert_eq!(summary.by_status[&ProposalStatus::Approved], 2);
        assert_eq!(summary.by_status[&ProposalStatus::Synced], 0);
        assert_eq!(
            summary.by_implementation_status[&ImplementationStatus::NotStarted],
            4
        );
        assert_eq!(summary.open_opportunities, 1);
        assert_eq!(summary.ready_to_sync, 1);
    }

    #[tokio::test]
    async fn test_work_queue_buckets() {
        let (store, _) = seeded().await;
        let queue = ReportingService::new(store).work_queue().await.unwrap();

        assert_eq!(titles(&queue.awaiting_review), vec!["p0", "p1"]);
        assert_eq!(titles(&queue.awaiting_implementation), vec!["p2"]);
        assert_eq!(titles(&queue.in_progress), vec!["p3"]);
        assert_eq!(titles(&queue.awaiting_validation), vec!["p4"]);
        assert_eq!(titles(&queue.ready_to_sync), vec!["p5"]);
    }

    #[tokio::test]
    async fn test_proposal_detail_for_unknown_proposal() {
        let store = Arc::new(MemoryGraphStore::new());
        let result = ReportingService::new(store).proposal_detail(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
