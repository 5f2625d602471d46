//! Opportunity ledger
//!
//! Accepts what the detector finds and lists what is still open.

use super::{Opportunity, OpportunityStatus, Priority};
use crate::config::LifecycleConfig;
use crate::error::AppError;
use crate::store::GraphStore;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Default)]
pub struct NewOpportunity {
    pub kind: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub proposed_by: String,
    pub target_section: Option<String>,
}

#[derive(Clone)]
pub struct OpportunityLedger {
    store: Arc<dyn GraphStore>,
    config: LifecycleConfig,
}

impl OpportunityLedger {
    pub fn new(store: Arc<dyn GraphStore>, config: LifecycleConfig) -> Self {
        Self { store, config }
    }

    pub async fn record(&self, input: NewOpportunity) -> Result<Opportunity, AppError> {
        let kind = input.kind.trim();
        let description = input.description.trim();
        let proposed_by = input.proposed_by.trim();
        if kind.is_empty() || description.is_empty() || proposed_by.is_empty() {
            return Err(AppError::Validation(
                "Opportunity kind, description and proposer are required".into(),
            ));
        }

        let opportunity = Opportunity::new(
            kind.to_string(),
            description.to_string(),
            input.priority.unwrap_or_default(),
            proposed_by.to_string(),
            input
                .target_section
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        );
        self.store.insert_opportunity(&opportunity).await?;

        info!(
            opportunity_id = %opportunity.id,
            kind = %opportunity.kind,
            priority = %opportunity.priority,
            proposed_by = %opportunity.proposed_by,
            "Opportunity recorded"
        );
        Ok(opportunity)
    }

    /// Open opportunities, priority desc then newest first
    pub async fn open(&self, limit: Option<usize>) -> Vec<Opportunity> {
        let limit = self.config.clamp_limit(limit);
        match self
            .store
            .list_opportunities(OpportunityStatus::Open, limit)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "Failed to list open opportunities");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGraphStore;
    use pretty_assertions::assert_eq;

    fn ledger() -> OpportunityLedger {
        OpportunityLedger::new(Arc::new(MemoryGraphStore::new()), LifecycleConfig::default())
    }

    #[tokio::test]
    async fn test_record_and_list_open() {
        let ledger = ledger();
        ledger
            .record(NewOpportunity {
                kind: "performance".into(),
                description: "Slow replies".into(),
                proposed_by: "detector".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let urgent = ledger
            .record(NewOpportunity {
                kind: "security".into(),
                description: "Leaked token".into(),
                priority: Some(Priority::Critical),
                proposed_by: "detector".into(),
                target_section: Some("  ".into()),
            })
            .await
            .unwrap();
        assert!(urgent.target_section.is_none());

        let open = ledger.open(None).await;
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, urgent.id);
        assert_eq!(open[1].priority, Priority::Medium);
    }

    #[tokio::test]
    async fn test_record_requires_fields() {
        let result = ledger()
            .record(NewOpportunity {
                kind: "performance".into(),
                description: " ".into(),
                proposed_by: "detector".into(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
