//! Proposal lifecycle governance
//!
//! Opportunity -> Proposal -> Vetting -> Implementation -> Validation -> sync.
//! Every component is handed the store explicitly; none hold global state.

pub mod guardrail;
pub mod implementation;
pub mod mapper;
pub mod models;
pub mod opportunity;
pub mod reporting;
pub mod review;
pub mod state_machine;
pub mod validator;

#[cfg(test)]
mod scenarios;

pub use guardrail::{GuardrailEnforcer, GuardrailFinding, GuardrailViolation};
pub use implementation::ImplementationTracker;
pub use mapper::{SectionMapper, SyncDecision, SyncOutcome};
pub use models::*;
pub use opportunity::{NewOpportunity, OpportunityLedger};
pub use reporting::{LifecycleSummary, ProposalDetail, ReportingService, WorkQueue};
pub use review::{NewVetting, ReviewService};
pub use state_machine::{NewProposal, ProposalStateMachine, TransitionReceipt};
pub use validator::{ValidationReport, Validator};

use crate::config::LifecycleConfig;
use crate::store::GraphStore;
use std::sync::Arc;

/// All lifecycle components wired to one store
#[derive(Clone)]
pub struct Lifecycle {
    pub opportunities: OpportunityLedger,
    pub state_machine: ProposalStateMachine,
    pub reviews: ReviewService,
    pub implementations: ImplementationTracker,
    pub validator: Validator,
    pub mapper: SectionMapper,
    pub enforcer: GuardrailEnforcer,
    pub reporting: ReportingService,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn GraphStore>, config: LifecycleConfig) -> Self {
        let state_machine = ProposalStateMachine::new(store.clone(), config.clone());
        Self {
            opportunities: OpportunityLedger::new(store.clone(), config.clone()),
            reviews: ReviewService::new(store.clone()),
            implementations: ImplementationTracker::new(store.clone(), state_machine.clone()),
            validator: Validator::new(store.clone()),
            mapper: SectionMapper::new(store.clone(), config),
            enforcer: GuardrailEnforcer::new(store.clone()),
            reporting: ReportingService::new(store),
            state_machine,
        }
    }
}
