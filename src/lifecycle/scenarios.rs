//! End-to-end lifecycle runs against the in-memory store

use super::*;
use crate::config::LifecycleConfig;
use crate::error::AppError;
use crate::store::{GraphStore, MemoryGraphStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_test::assert_ok;
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryGraphStore>,
    lifecycle: Lifecycle,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryGraphStore::new());
    let lifecycle = Lifecycle::new(store.clone(), LifecycleConfig::default());
    Harness { store, lifecycle }
}

/// Create "Add rate limiting" and walk it to approved
async fn approved_rate_limiting(lc: &Lifecycle) -> Proposal {
    let proposal = lc
        .state_machine
        .create(NewProposal {
            title: "Add rate limiting".into(),
            description: "Throttle tool calls per agent".into(),
            category: Some("security".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Proposed);

    lc.state_machine
        .transition(proposal.id, ProposalStatus::UnderReview, "triaged", None)
        .await
        .unwrap();
    let reviewed = lc.state_machine.get_status(proposal.id).await.unwrap();
    assert_eq!(reviewed.status, ProposalStatus::UnderReview);
    assert_eq!(reviewed.state_change_reason.as_deref(), Some("triaged"));

    lc.state_machine
        .transition(proposal.id, ProposalStatus::Approved, "ok", None)
        .await
        .unwrap();
    let approved = lc.state_machine.get_status(proposal.id).await.unwrap();
    assert_eq!(approved.status, ProposalStatus::Approved);
    assert_eq!(approved.previous_state, Some(ProposalStatus::UnderReview));
    assert_eq!(approved.state_change_reason.as_deref(), Some("ok"));
    approved
}

/// Build, complete and validate the approved proposal
async fn build_and_validate(lc: &Lifecycle, proposal_id: Uuid) -> ValidationReport {
    let implementation = lc
        .implementations
        .start(proposal_id, "builder", None)
        .await
        .unwrap();
    lc.implementations
        .update_progress(implementation.id, 50, None)
        .await
        .unwrap();
    lc.implementations
        .update_progress(implementation.id, 100, None)
        .await
        .unwrap();
    lc.implementations
        .complete(implementation.id, "done")
        .await
        .unwrap();
    lc.validator
        .validate_implementation(implementation.id)
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_review_walks_proposed_to_approved() {
    let h = harness();
    approved_rate_limiting(&h.lifecycle).await;
}

#[tokio::test]
async fn scenario_completed_implementation_validates_proposal() {
    let h = harness();
    let proposal = approved_rate_limiting(&h.lifecycle).await;

    let report = build_and_validate(&h.lifecycle, proposal.id).await;
    assert_eq!(report.validation.checks.len(), 5);
    assert!(report.validation.passed);
    assert!(report.promoted);

    let stored = h.lifecycle.state_machine.get_status(proposal.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Validated);
    assert_eq!(stored.implementation_status, ImplementationStatus::Validated);
}

#[tokio::test]
async fn scenario_sync_refused_before_implementation() {
    let h = harness();
    let proposal = approved_rate_limiting(&h.lifecycle).await;

    let outcome = h
        .lifecycle
        .mapper
        .mark_synced(proposal.id, "Security Architecture")
        .await
        .unwrap();
    assert!(!outcome.allowed);
    assert!(outcome.reason.contains("implementation_status"));
    assert!(h.store.get_sync_link(proposal.id).await.unwrap().is_none());
    assert!(h
        .store
        .get_section("Security Architecture")
        .await
        .unwrap()
        .is_none());
    let stored = h.lifecycle.state_machine.get_status(proposal.id).await.unwrap();
    assert_eq!(stored, proposal);
}

#[tokio::test]
async fn scenario_full_lifecycle_syncs_once() {
    let h = harness();
    let lc = &h.lifecycle;
    let proposal = approved_rate_limiting(lc).await;
    let section = lc.mapper.assign_section(proposal.id).await.unwrap();
    assert_eq!(section.target_section.as_deref(), Some("Security Architecture"));

    build_and_validate(lc, proposal.id).await;
    assert_eq!(lc.mapper.ready_to_sync().await.len(), 1);

    let outcome = lc
        .mapper
        .mark_synced(proposal.id, "Security Architecture")
        .await
        .unwrap();
    assert!(outcome.allowed);
    assert!(!outcome.already_synced);
    assert_eq!(
        outcome.section.as_ref().map(|s| s.title.as_str()),
        Some("Security Architecture")
    );

    let stored = lc.state_machine.get_status(proposal.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Synced);
    assert!(stored.synced_at.is_some());
    assert!(h.store.get_sync_link(proposal.id).await.unwrap().is_some());
    assert!(lc.mapper.ready_to_sync().await.is_empty());

    // Re-publishing is a no-op success
    let again = assert_ok!(lc.mapper.mark_synced(proposal.id, "Security Architecture").await);
    assert!(again.allowed);
    assert!(again.already_synced);
    assert_eq!(h.store.list_sync_links().await.unwrap().len(), 1);

    // Synced implies validated implementation backed by a passing validation
    let detail = lc.reporting.proposal_detail(proposal.id).await.unwrap();
    assert_eq!(detail.proposal.implementation_status, ImplementationStatus::Validated);
    assert!(detail.validations.first().is_some_and(|v| v.passed));
    assert!(lc.reporting.guardrail_violations().await.unwrap().is_empty());

    // Nothing leaves synced
    for target in ProposalStatus::ALL {
        let err = lc
            .state_machine
            .transition(proposal.id, *target, "reopen", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }
}

#[tokio::test]
async fn scenario_forced_synced_state_is_audited() {
    let h = harness();
    let lc = &h.lifecycle;
    let tampered = lc
        .state_machine
        .create(NewProposal {
            title: "Tampered".into(),
            description: "written around the API".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let proposal = approved_rate_limiting(lc).await;
    build_and_validate(lc, proposal.id).await;
    lc.mapper
        .mark_synced(proposal.id, "Security Architecture")
        .await
        .unwrap();
    assert!(lc.reporting.guardrail_violations().await.unwrap().is_empty());

    assert!(
        h.store
            .overwrite_proposal_state(
                tampered.id,
                ProposalStatus::Synced,
                ImplementationStatus::InProgress,
            )
            .await
    );

    let findings = lc.enforcer.audit_guardrail_violations().await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].proposal_id, tampered.id);
    assert_eq!(findings[0].implementation_status, ImplementationStatus::InProgress);

    // Audit only reports
    let stored = lc.state_machine.get_status(tampered.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Synced);
}

#[tokio::test]
async fn concurrent_syncs_create_one_link() {
    let h = harness();
    let lc = &h.lifecycle;
    let proposal = approved_rate_limiting(lc).await;
    build_and_validate(lc, proposal.id).await;

    let (a, b) = tokio::join!(
        lc.mapper.mark_synced(proposal.id, "Security Architecture"),
        lc.mapper.mark_synced(proposal.id, "Security Architecture"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.allowed && b.allowed);
    assert_eq!(
        [a.already_synced, b.already_synced]
            .iter()
            .filter(|already| !**already)
            .count(),
        1
    );
    assert_eq!(h.store.list_sync_links().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_validation_permits_retry() {
    let h = harness();
    let lc = &h.lifecycle;
    let proposal = approved_rate_limiting(lc).await;
    let implementation = lc
        .implementations
        .start(proposal.id, "builder", None)
        .await
        .unwrap();

    // Progress still short of 100
    let report = lc
        .validator
        .validate_implementation(implementation.id)
        .await
        .unwrap();
    assert!(!report.validation.passed);
    let stored = lc.state_machine.get_status(proposal.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Approved);

    lc.implementations
        .update_progress(implementation.id, 100, None)
        .await
        .unwrap();
    lc.implementations
        .complete(implementation.id, "done")
        .await
        .unwrap();
    let report = lc.validator.revalidate(implementation.id).await.unwrap();
    assert!(report.validation.passed);
    assert_eq!(
        h.store
            .list_validations(implementation.id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn synced_proposal_keeps_its_implementation_record() {
    let h = harness();
    let lc = &h.lifecycle;
    let proposal = approved_rate_limiting(lc).await;
    build_and_validate(lc, proposal.id).await;
    lc.mapper
        .mark_synced(proposal.id, "Security Architecture")
        .await
        .unwrap();
    let implementation = h
        .store
        .active_implementation(proposal.id)
        .await
        .unwrap()
        .unwrap();

    let err = lc
        .implementations
        .fail(implementation.id, "oops")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let err = lc
        .state_machine
        .update_implementation_status(proposal.id, ImplementationStatus::Failed, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let err = lc
        .state_machine
        .update_implementation_status(proposal.id, ImplementationStatus::Validated, Some(10), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    // A later revalidation still sees the finished work
    let report = lc.validator.revalidate(implementation.id).await.unwrap();
    assert!(report.validation.passed);
    assert_eq!(report.proposal_status, ProposalStatus::Synced);

    let stored = lc.state_machine.get_status(proposal.id).await.unwrap();
    assert_eq!(stored.status, ProposalStatus::Synced);
    assert_eq!(stored.implementation_status, ImplementationStatus::Validated);
    assert!(lc.enforcer.audit_guardrail_violations().await.unwrap().is_empty());
}
