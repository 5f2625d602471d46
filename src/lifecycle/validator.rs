//! Implementation validator
//!
//! Runs a fixed, ordered battery of checks against an implementation and
//! persists the outcome as an immutable [`Validation`]. Only critical checks
//! decide `passed`; the rest are recorded for the reviewer.

use super::{
    Implementation, ImplementationStatus, ProposalStatus, Validation, ValidationCheck,
    ValidationStatus,
};
use crate::error::AppError;
use crate::store::{GraphStore, ImplementationPatch, StatusWrite};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Category-specific evidence: check name and the words that count as evidence
fn category_evidence(category: &str) -> Option<(&'static str, &'static [&'static str])> {
    match category {
        "api" => Some((
            "api_contract_noted",
            &["api", "endpoint", "contract", "route", "schema", "version"],
        )),
        "database" => Some((
            "data_migration_noted",
            &["migration", "schema", "index", "table", "backfill"],
        )),
        "security" => Some((
            "security_review_noted",
            &["security", "threat", "audit", "permission", "auth", "review"],
        )),
        "deployment" => Some((
            "rollout_plan_noted",
            &["rollout", "rollback", "canary", "deploy", "feature flag"],
        )),
        _ => None,
    }
}

fn category_check(implementation: &Implementation, category: &str) -> ValidationCheck {
    match category_evidence(category) {
        Some((name, keywords)) => {
            let text = format!(
                "{} {}",
                implementation.summary.as_deref().unwrap_or_default(),
                implementation.notes.as_deref().unwrap_or_default()
            )
            .to_lowercase();
            let found: Vec<&str> = keywords
                .iter()
                .copied()
                .filter(|k| text.contains(k))
                .collect();
            let description = if found.is_empty() {
                format!("no {} evidence in summary or notes", category)
            } else {
                format!("{} evidence: {}", category, found.join(", "))
            };
            ValidationCheck::new(name, !found.is_empty(), description, false)
        }
        None => {
            let has_notes = implementation
                .notes
                .as_deref()
                .is_some_and(|n| !n.trim().is_empty());
            ValidationCheck::new(
                "category_notes_present",
                has_notes,
                format!("notes recorded for category '{}'", category),
                false,
            )
        }
    }
}

/// Extension point for blocking-issue detection. The baseline has no issue
/// source, so it always passes.
pub fn no_blocking_issues(implementation: &Implementation) -> ValidationCheck {
    ValidationCheck::new(
        "no_blocking_issues",
        true,
        format!("no blocking issues recorded against implementation {}", implementation.id),
        true,
    )
}

/// The ordered check battery. Pure: no store access.
pub fn run_checks(implementation: &Implementation, category: Option<&str>) -> Vec<ValidationCheck> {
    let mut checks = Vec::with_capacity(5);

    checks.push(ValidationCheck::new(
        "implementation_complete",
        implementation.status == ImplementationStatus::Completed,
        format!("implementation status is {}", implementation.status),
        true,
    ));
    checks.push(ValidationCheck::new(
        "progress_complete",
        implementation.progress >= 100,
        format!("progress is {}%", implementation.progress),
        true,
    ));
    checks.push(ValidationCheck::new(
        "has_summary",
        implementation
            .summary
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty()),
        "implementation summary is present",
        false,
    ));
    if let Some(category) = category {
        checks.push(category_check(implementation, category));
    }
    checks.push(no_blocking_issues(implementation));

    checks
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub validation: Validation,
    pub proposal_status: ProposalStatus,
    /// Whether this run moved the proposal to validated
    pub promoted: bool,
}

#[derive(Clone)]
pub struct Validator {
    store: Arc<dyn GraphStore>,
}

impl Validator {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn validate_implementation(
        &self,
        implementation_id: Uuid,
    ) -> Result<ValidationReport, AppError> {
        let implementation = self
            .store
            .get_implementation(implementation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Implementation {} not found", implementation_id))
            })?;
        let proposal = self
            .store
            .get_proposal(implementation.proposal_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Proposal {} not found", implementation.proposal_id))
            })?;

        let checks = run_checks(&implementation, proposal.category.as_deref());
        let validation = Validation::from_checks(implementation_id, checks);
        self.store.insert_validation(&validation).await?;

        let validation_status = if validation.passed {
            ValidationStatus::Passed
        } else {
            ValidationStatus::Failed
        };
        let patch = ImplementationPatch {
            validation_status: Some(validation_status),
            ..Default::default()
        };
        self.store
            .update_implementation(implementation_id, &patch, Utc::now())
            .await?;

        if !validation.passed {
            warn!(
                proposal_id = %proposal.id,
                implementation_id = %implementation_id,
                validation_id = %validation.id,
                failed_count = validation.failed_count,
                "Validation failed"
            );
            return Ok(ValidationReport {
                validation,
                proposal_status: proposal.status,
                promoted: false,
            });
        }

        let reason = format!("validation {} passed", validation.id);
        let (proposal_status, promoted) = match self
            .store
            .promote_validated(proposal.id, &reason, Utc::now())
            .await?
        {
            StatusWrite::Applied => (ProposalStatus::Validated, true),
            StatusWrite::Stale { current } => {
                warn!(
                    proposal_id = %proposal.id,
                    status = %current,
                    "Validation passed but proposal can no longer be promoted"
                );
                (current, false)
            }
            StatusWrite::Missing => {
                return Err(AppError::NotFound(format!(
                    "Proposal {} not found",
                    proposal.id
                )))
            }
        };

        info!(
            proposal_id = %proposal.id,
            implementation_id = %implementation_id,
            validation_id = %validation.id,
            from = %proposal.status,
            to = %proposal_status,
            failed_count = validation.failed_count,
            "Validation passed"
        );
        Ok(ValidationReport {
            validation,
            proposal_status,
            promoted,
        })
    }

    /// Runs the battery again; earlier validations stay on record
    pub async fn revalidate(&self, implementation_id: Uuid) -> Result<ValidationReport, AppError> {
        info!(implementation_id = %implementation_id, "Revalidating implementation");
        self.validate_implementation(implementation_id).await
    }
}
