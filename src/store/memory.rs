//! In-memory graph store
//!
//! All entity maps sit behind one lock, so each trait call is a single critical
//! section and multi-entity writes (sync, proposal-from-opportunity) are atomic.

use super::{
    queue_order, GraphStore, ImplementationPatch, StatusChange, StatusWrite, StoreError,
    StoreResult, SyncWrite, SyncWriteOutcome,
};
use crate::lifecycle::{
    DocumentSection, Implementation, ImplementationStatus, Opportunity, OpportunityStatus,
    Proposal, ProposalStatus, SyncLink, Validation, Vetting,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    opportunities: HashMap<Uuid, Opportunity>,
    proposals: HashMap<Uuid, Proposal>,
    /// Proposal ID -> vettings in insertion order
    vettings: HashMap<Uuid, Vec<Vetting>>,
    implementations: HashMap<Uuid, Implementation>,
    /// Implementation ID -> validations in insertion order
    validations: HashMap<Uuid, Vec<Validation>>,
    sections: HashMap<String, DocumentSection>,
    /// Proposal ID -> terminal link
    sync_links: HashMap<Uuid, SyncLink>,
}

/// Thread-safe in-memory store
#[derive(Clone, Default)]
pub struct MemoryGraphStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw overwrite of both status fields, skipping every lifecycle rule.
    /// Stands in for tampering or a writer that bypasses the API.
    #[cfg(test)]
    pub async fn overwrite_proposal_state(
        &self,
        id: Uuid,
        status: ProposalStatus,
        implementation_status: ImplementationStatus,
    ) -> bool {
        let mut tables = self.tables.write().await;
        match tables.proposals.get_mut(&id) {
            Some(proposal) => {
                proposal.status = status;
                proposal.implementation_status = implementation_status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn insert_opportunity(&self, opportunity: &Opportunity) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.opportunities.contains_key(&opportunity.id) {
            return Err(StoreError::Constraint(format!(
                "opportunity {} already exists",
                opportunity.id
            )));
        }
        tables.opportunities.insert(opportunity.id, opportunity.clone());
        Ok(())
    }

    async fn get_opportunity(&self, id: Uuid) -> StoreResult<Option<Opportunity>> {
        let tables = self.tables.read().await;
        Ok(tables.opportunities.get(&id).cloned())
    }

    async fn list_opportunities(
        &self,
        status: OpportunityStatus,
        limit: usize,
    ) -> StoreResult<Vec<Opportunity>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Opportunity> = tables
            .opportunities
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| queue_order((a.priority, a.created_at), (b.priority, b.created_at)));
        found.truncate(limit);
        Ok(found)
    }

    async fn insert_proposal(&self, proposal: &Proposal) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.proposals.contains_key(&proposal.id) {
            return Err(StoreError::Constraint(format!(
                "proposal {} already exists",
                proposal.id
            )));
        }

        if let Some(opportunity_id) = proposal.opportunity_id {
            let already_evolved = tables
                .proposals
                .values()
                .any(|p| p.opportunity_id == Some(opportunity_id));
            let opportunity = tables.opportunities.get_mut(&opportunity_id).ok_or_else(|| {
                StoreError::Constraint(format!("opportunity {} does not exist", opportunity_id))
            })?;
            if already_evolved || opportunity.status != OpportunityStatus::Open {
                return Err(StoreError::Constraint(format!(
                    "opportunity {} is {} and cannot evolve into another proposal",
                    opportunity_id, opportunity.status
                )));
            }
            opportunity.status = OpportunityStatus::Converted;
        }

        tables.proposals.insert(proposal.id, proposal.clone());
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> StoreResult<Option<Proposal>> {
        let tables = self.tables.read().await;
        Ok(tables.proposals.get(&id).cloned())
    }

    async fn list_proposals_by_status(
        &self,
        status: ProposalStatus,
        limit: usize,
    ) -> StoreResult<Vec<Proposal>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Proposal> = tables
            .proposals
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| queue_order((a.priority, a.created_at), (b.priority, b.created_at)));
        found.truncate(limit);
        Ok(found)
    }

    async fn list_proposals(&self) -> StoreResult<Vec<Proposal>> {
        let tables = self.tables.read().await;
        let mut all: Vec<Proposal> = tables.proposals.values().cloned().collect();
        all.sort_by(|a, b| queue_order((a.priority, a.created_at), (b.priority, b.created_at)));
        Ok(all)
    }

    async fn change_status(&self, id: Uuid, change: &StatusChange) -> StoreResult<StatusWrite> {
        let mut tables = self.tables.write().await;
        let Some(proposal) = tables.proposals.get_mut(&id) else {
            return Ok(StatusWrite::Missing);
        };
        if proposal.status != change.expected {
            return Ok(StatusWrite::Stale {
                current: proposal.status,
            });
        }
        proposal.previous_state = Some(proposal.status);
        proposal.status = change.target;
        proposal.state_change_reason = Some(change.reason.clone());
        proposal.state_change_metadata = change.metadata.clone();
        proposal.state_changed_at = Some(change.changed_at);
        proposal.updated_at = change.changed_at;
        Ok(StatusWrite::Applied)
    }

    async fn set_implementation_status(
        &self,
        id: Uuid,
        status: ImplementationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.proposals.get_mut(&id) {
            Some(proposal) => {
                proposal.implementation_status = status;
                proposal.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_target_section(
        &self,
        id: Uuid,
        section: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.proposals.get_mut(&id) {
            Some(proposal) => {
                proposal.target_section = Some(section.to_string());
                proposal.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn promote_validated(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusWrite> {
        let mut tables = self.tables.write().await;
        let Some(proposal) = tables.proposals.get_mut(&id) else {
            return Ok(StatusWrite::Missing);
        };
        // Validated is reachable only from implemented
        if !matches!(
            proposal.status,
            ProposalStatus::Implemented | ProposalStatus::Validated
        ) {
            return Ok(StatusWrite::Stale {
                current: proposal.status,
            });
        }
        if proposal.status != ProposalStatus::Validated {
            proposal.previous_state = Some(proposal.status);
        }
        proposal.status = ProposalStatus::Validated;
        proposal.implementation_status = ImplementationStatus::Validated;
        proposal.state_change_reason = Some(reason.to_string());
        proposal.state_change_metadata = None;
        proposal.state_changed_at = Some(at);
        proposal.updated_at = at;
        Ok(StatusWrite::Applied)
    }

    async fn insert_vetting(&self, vetting: &Vetting) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.proposals.contains_key(&vetting.proposal_id) {
            return Err(StoreError::Constraint(format!(
                "proposal {} does not exist",
                vetting.proposal_id
            )));
        }
        tables
            .vettings
            .entry(vetting.proposal_id)
            .or_default()
            .push(vetting.clone());
        Ok(())
    }

    async fn list_vettings(&self, proposal_id: Uuid) -> StoreResult<Vec<Vetting>> {
        let tables = self.tables.read().await;
        Ok(tables
            .vettings
            .get(&proposal_id)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_implementation(&self, implementation: &Implementation) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.proposals.contains_key(&implementation.proposal_id) {
            return Err(StoreError::Constraint(format!(
                "proposal {} does not exist",
                implementation.proposal_id
            )));
        }
        let has_active = tables
            .implementations
            .values()
            .any(|i| i.proposal_id == implementation.proposal_id && i.is_active());
        if has_active {
            return Err(StoreError::Constraint(format!(
                "proposal {} already has an active implementation",
                implementation.proposal_id
            )));
        }
        tables
            .implementations
            .insert(implementation.id, implementation.clone());
        Ok(())
    }

    async fn get_implementation(&self, id: Uuid) -> StoreResult<Option<Implementation>> {
        let tables = self.tables.read().await;
        Ok(tables.implementations.get(&id).cloned())
    }

    async fn active_implementation(
        &self,
        proposal_id: Uuid,
    ) -> StoreResult<Option<Implementation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .implementations
            .values()
            .filter(|i| i.proposal_id == proposal_id && i.is_active())
            .max_by_key(|i| i.started_at)
            .cloned())
    }

    async fn update_implementation(
        &self,
        id: Uuid,
        patch: &ImplementationPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Implementation>> {
        let mut tables = self.tables.write().await;
        let Some(implementation) = tables.implementations.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(status) = patch.status {
            implementation.status = status;
        }
        if let Some(progress) = patch.progress {
            implementation.progress = progress;
        }
        if let Some(notes) = &patch.notes {
            implementation.notes = Some(notes.clone());
        }
        if let Some(summary) = &patch.summary {
            implementation.summary = Some(summary.clone());
        }
        if let Some(validation_status) = patch.validation_status {
            implementation.validation_status = Some(validation_status);
        }
        if let Some(completed_at) = patch.completed_at {
            implementation.completed_at = Some(completed_at);
        }
        implementation.updated_at = at;
        Ok(Some(implementation.clone()))
    }

    async fn insert_validation(&self, validation: &Validation) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables
            .implementations
            .contains_key(&validation.implementation_id)
        {
            return Err(StoreError::Constraint(format!(
                "implementation {} does not exist",
                validation.implementation_id
            )));
        }
        tables
            .validations
            .entry(validation.implementation_id)
            .or_default()
            .push(validation.clone());
        Ok(())
    }

    async fn list_validations(&self, implementation_id: Uuid) -> StoreResult<Vec<Validation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .validations
            .get(&implementation_id)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_section(&self, title: &str) -> StoreResult<Option<DocumentSection>> {
        let tables = self.tables.read().await;
        Ok(tables.sections.get(title).cloned())
    }

    async fn sync_proposal(&self, write: &SyncWrite) -> StoreResult<SyncWriteOutcome> {
        let mut tables = self.tables.write().await;

        if let Some(link) = tables.sync_links.get(&write.proposal_id) {
            return Ok(SyncWriteOutcome::AlreadyLinked { link: link.clone() });
        }

        let Some(proposal) = tables.proposals.get(&write.proposal_id) else {
            return Ok(SyncWriteOutcome::Missing);
        };
        if proposal.status != ProposalStatus::Validated
            || proposal.implementation_status != ImplementationStatus::Validated
        {
            return Ok(SyncWriteOutcome::Refused {
                status: proposal.status,
                implementation_status: proposal.implementation_status,
            });
        }

        let next_order = tables.sections.values().map(|s| s.order).max().unwrap_or(0) + 1;
        let section = tables
            .sections
            .entry(write.section_title.clone())
            .and_modify(|s| s.last_updated = write.linked_at)
            .or_insert_with(|| DocumentSection::new(&write.section_title, next_order, write.linked_at))
            .clone();

        let link = SyncLink {
            proposal_id: write.proposal_id,
            section_title: section.title.clone(),
            linked_at: write.linked_at,
        };
        tables.sync_links.insert(write.proposal_id, link.clone());

        if let Some(proposal) = tables.proposals.get_mut(&write.proposal_id) {
            proposal.previous_state = Some(proposal.status);
            proposal.status = ProposalStatus::Synced;
            proposal.state_change_reason = Some(write.reason.clone());
            proposal.state_change_metadata = None;
            proposal.state_changed_at = Some(write.linked_at);
            proposal.synced_at = Some(write.linked_at);
            proposal.updated_at = write.linked_at;
        }

        Ok(SyncWriteOutcome::Linked { section, link })
    }

    async fn get_sync_link(&self, proposal_id: Uuid) -> StoreResult<Option<SyncLink>> {
        let tables = self.tables.read().await;
        Ok(tables.sync_links.get(&proposal_id).cloned())
    }

    async fn list_sync_links(&self) -> StoreResult<Vec<SyncLink>> {
        let tables = self.tables.read().await;
        let mut links: Vec<SyncLink> = tables.sync_links.values().cloned().collect();
        links.sort_by(|a, b| b.linked_at.cmp(&a.linked_at));
        Ok(links)
    }

    async fn list_ready_to_sync(&self) -> StoreResult<Vec<Proposal>> {
        let tables = self.tables.read().await;
        let mut ready: Vec<Proposal> = tables
            .proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Validated)
            .filter(|p| !tables.sync_links.contains_key(&p.id))
            .cloned()
            .collect();
        ready.sort_by_key(|p| std::cmp::Reverse(p.state_changed_at.unwrap_or(p.created_at)));
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Priority;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn proposal(title: &str) -> Proposal {
        Proposal::new(None, title.to_string(), "description".to_string(), None)
    }

    async fn validated_proposal(store: &MemoryGraphStore) -> Proposal {
        let mut p = proposal("Add rate limiting");
        p.status = ProposalStatus::Implemented;
        store.insert_proposal(&p).await.unwrap();
        let write = store.promote_validated(p.id, "validated", Utc::now()).await.unwrap();
        assert_eq!(write, StatusWrite::Applied);
        p
    }

    #[tokio::test]
    async fn test_list_by_status_orders_priority_then_recency() {
        let store = MemoryGraphStore::new();
        let base = Utc::now();

        let mut old_high = proposal("old high");
        old_high.priority = Priority::High;
        old_high.created_at = base - Duration::minutes(10);
        let mut new_high = proposal("new high");
        new_high.priority = Priority::High;
        new_high.created_at = base;
        let mut critical = proposal("critical");
        critical.priority = Priority::Critical;
        critical.created_at = base - Duration::hours(1);
        let low = {
            let mut p = proposal("low");
            p.priority = Priority::Low;
            p
        };

        for p in [&old_high, &low, &critical, &new_high] {
            store.insert_proposal(p).await.unwrap();
        }

        let titles: Vec<String> = store
            .list_proposals_by_status(ProposalStatus::Proposed, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["critical", "new high", "old high", "low"]);

        let limited = store
            .list_proposals_by_status(ProposalStatus::Proposed, 2)
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_change_status_is_compare_and_set() {
        let store = MemoryGraphStore::new();
        let p = proposal("cas");
        store.insert_proposal(&p).await.unwrap();

        let change = StatusChange {
            expected: ProposalStatus::Approved,
            target: ProposalStatus::Implemented,
            reason: "built".into(),
            metadata: None,
            changed_at: Utc::now(),
        };
        let write = store.change_status(p.id, &change).await.unwrap();
        assert_eq!(
            write,
            StatusWrite::Stale {
                current: ProposalStatus::Proposed
            }
        );
        let unchanged = store.get_proposal(p.id).await.unwrap().unwrap();
        assert_eq!(unchanged, p);

        let missing = store.change_status(Uuid::new_v4(), &change).await.unwrap();
        assert_eq!(missing, StatusWrite::Missing);
    }

    #[tokio::test]
    async fn test_proposal_claims_opportunity_once() {
        let store = MemoryGraphStore::new();
        let opportunity = Opportunity::new(
            "performance".into(),
            "Cache tool results".into(),
            Priority::High,
            "detector".into(),
            None,
        );
        store.insert_opportunity(&opportunity).await.unwrap();

        let first = Proposal::new(Some(opportunity.id), "Cache".into(), "d".into(), None);
        store.insert_proposal(&first).await.unwrap();
        let stored = store.get_opportunity(opportunity.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OpportunityStatus::Converted);

        let second = Proposal::new(Some(opportunity.id), "Cache again".into(), "d".into(), None);
        let err = store.insert_proposal(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(store.get_proposal(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_one_active_implementation() {
        let store = MemoryGraphStore::new();
        let p = proposal("impl");
        store.insert_proposal(&p).await.unwrap();

        let first = Implementation::new(p.id, "builder".into(), None);
        store.insert_implementation(&first).await.unwrap();
        let second = Implementation::new(p.id, "builder".into(), None);
        assert!(store.insert_implementation(&second).await.is_err());

        let patch = ImplementationPatch {
            status: Some(ImplementationStatus::Failed),
            ..Default::default()
        };
        store.update_implementation(first.id, &patch, Utc::now()).await.unwrap();
        store.insert_implementation(&second).await.unwrap();
        let active = store.active_implementation(p.id).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
    }

    #[tokio::test]
    async fn test_sync_refused_without_validated_flags() {
        let store = MemoryGraphStore::new();
        let p = proposal("not ready");
        store.insert_proposal(&p).await.unwrap();

        let outcome = store
            .sync_proposal(&SyncWrite {
                proposal_id: p.id,
                section_title: "Security Architecture".into(),
                reason: "sync".into(),
                linked_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SyncWriteOutcome::Refused {
                status: ProposalStatus::Proposed,
                implementation_status: ImplementationStatus::NotStarted,
            }
        );
        assert!(store.get_sync_link(p.id).await.unwrap().is_none());
        assert!(store.get_section("Security Architecture").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_links_once_and_merges_section() {
        let store = MemoryGraphStore::new();
        let first = validated_proposal(&store).await;
        let second = validated_proposal(&store).await;
        let write = |id| SyncWrite {
            proposal_id: id,
            section_title: "Security Architecture".into(),
            reason: "sync".into(),
            linked_at: Utc::now(),
        };

        let outcome = store.sync_proposal(&write(first.id)).await.unwrap();
        let SyncWriteOutcome::Linked { section, .. } = outcome else {
            panic!("expected a new link, got {:?}", outcome);
        };
        assert_eq!(section.order, 1);

        let again = store.sync_proposal(&write(first.id)).await.unwrap();
        assert!(matches!(again, SyncWriteOutcome::AlreadyLinked { .. }));
        assert_eq!(store.list_sync_links().await.unwrap().len(), 1);

        store.sync_proposal(&write(second.id)).await.unwrap();
        let merged = store.get_section("Security Architecture").await.unwrap().unwrap();
        assert_eq!(merged.order, 1);
        assert_eq!(store.list_sync_links().await.unwrap().len(), 2);

        let synced = store.get_proposal(first.id).await.unwrap().unwrap();
        assert_eq!(synced.status, ProposalStatus::Synced);
        assert_eq!(synced.previous_state, Some(ProposalStatus::Validated));
        assert!(synced.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_ready_to_sync_excludes_linked() {
        let store = MemoryGraphStore::new();
        let linked = validated_proposal(&store).await;
        let waiting = validated_proposal(&store).await;
        store
            .sync_proposal(&SyncWrite {
                proposal_id: linked.id,
                section_title: "System Overview".into(),
                reason: "sync".into(),
                linked_at: Utc::now(),
            })
            .await
            .unwrap();

        let ready = store.list_ready_to_sync().await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, waiting.id);
    }

    #[tokio::test]
    async fn test_promote_validated_only_from_implemented() {
        let store = MemoryGraphStore::new();
        let p = proposal("not yet built");
        store.insert_proposal(&p).await.unwrap();

        for status in ProposalStatus::ALL {
            if matches!(status, ProposalStatus::Implemented | ProposalStatus::Validated) {
                continue;
            }
            store
                .overwrite_proposal_state(p.id, *status, ImplementationStatus::Completed)
                .await;
            let write = store.promote_validated(p.id, "validated", Utc::now()).await.unwrap();
            assert_eq!(write, StatusWrite::Stale { current: *status });
            let stored = store.get_proposal(p.id).await.unwrap().unwrap();
            assert_eq!(stored.status, *status);
            assert_eq!(stored.implementation_status, ImplementationStatus::Completed);
        }

        store
            .overwrite_proposal_state(p.id, ProposalStatus::Implemented, ImplementationStatus::Completed)
            .await;
        let write = store.promote_validated(p.id, "validated", Utc::now()).await.unwrap();
        assert_eq!(write, StatusWrite::Applied);
        let stored = store.get_proposal(p.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Validated);
        assert_eq!(stored.previous_state, Some(ProposalStatus::Implemented));
    }
}
