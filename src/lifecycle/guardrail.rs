//! Sync guardrail
//!
//! [`flag_condition`] is the two-flag check shared with the mapper. The
//! [`GuardrailEnforcer`] adds the expensive part: it walks
//! proposal -> implementation -> validations and requires the most recent
//! validation to have passed, so denormalized flags written by some other path
//! cannot carry a proposal through on their own.

use super::{
    Implementation, ImplementationStatus, ProposalStatus, Validation, ValidationStatus,
};
use crate::error::AppError;
use crate::store::GraphStore;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Both status fields must read `validated` before a proposal may sync
pub fn flag_condition(
    status: ProposalStatus,
    implementation_status: ImplementationStatus,
) -> Result<(), String> {
    if status == ProposalStatus::Validated
        && implementation_status == ImplementationStatus::Validated
    {
        Ok(())
    } else {
        Err(format!(
            "sync requires status=validated and implementation_status=validated, found status={} and implementation_status={}",
            status, implementation_status
        ))
    }
}

/// Typed refusal returned by the raising guardrail variant
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}: {reason}")]
pub struct GuardrailViolation {
    pub proposal_id: Uuid,
    pub message: String,
    pub reason: String,
}

impl GuardrailViolation {
    pub fn new(proposal_id: Uuid, message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            proposal_id,
            message: message.into(),
            reason: reason.into(),
        }
    }
}

/// Ground truth behind a proposal's implementation flags
#[derive(Debug, Clone, Default)]
pub struct ValidationEvidence {
    pub implementation: Option<Implementation>,
    /// Most recent validation of that implementation
    pub latest: Option<Validation>,
}

impl ValidationEvidence {
    pub async fn gather(store: &dyn GraphStore, proposal_id: Uuid) -> Result<Self, AppError> {
        let Some(implementation) = store.active_implementation(proposal_id).await? else {
            return Ok(Self::default());
        };
        let latest = store
            .list_validations(implementation.id)
            .await?
            .into_iter()
            .next();
        Ok(Self {
            implementation: Some(implementation),
            latest,
        })
    }

    /// `Ok` only when a passing validation backs the implementation
    pub fn verdict(&self) -> Result<(), String> {
        let Some(implementation) = &self.implementation else {
            return Err("no active implementation exists".to_string());
        };
        let Some(latest) = &self.latest else {
            return Err(format!(
                "implementation {} has no validation record",
                implementation.id
            ));
        };
        if !latest.passed {
            return Err(format!(
                "most recent validation {} of implementation {} failed ({} failed checks)",
                latest.id, implementation.id, latest.failed_count
            ));
        }
        if implementation.validation_status != Some(ValidationStatus::Passed) {
            return Err(format!(
                "implementation {} records validation_status={} despite passing validation {}",
                implementation.id,
                implementation
                    .validation_status
                    .map(|s| s.as_str())
                    .unwrap_or("none"),
                latest.id
            ));
        }
        Ok(())
    }
}

/// Evidence that cleared a proposal for sync
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailClearance {
    pub proposal_id: Uuid,
    pub implementation_id: Uuid,
    pub validation_id: Uuid,
}

/// A synced or linked proposal whose state no longer satisfies the guardrail
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailFinding {
    pub proposal_id: Uuid,
    pub title: String,
    pub status: ProposalStatus,
    pub implementation_status: ImplementationStatus,
    pub section: Option<String>,
    pub problems: Vec<String>,
}

#[derive(Clone)]
pub struct GuardrailEnforcer {
    store: Arc<dyn GraphStore>,
}

impl GuardrailEnforcer {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Raising variant. Violations come back as `AppError::GuardrailViolation`.
    pub async fn enforce(&self, proposal_id: Uuid) -> Result<GuardrailClearance, AppError> {
        let proposal = self
            .store
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", proposal_id)))?;

        if let Err(reason) = flag_condition(proposal.status, proposal.implementation_status) {
            warn!(proposal_id = %proposal_id, allowed = false, reason = %reason, "Guardrail enforcer blocked sync");
            return Err(GuardrailViolation::new(proposal_id, "Sync blocked by guardrail", reason).into());
        }

        let evidence = ValidationEvidence::gather(self.store.as_ref(), proposal_id).await?;
        if let Err(reason) = evidence.verdict() {
            warn!(proposal_id = %proposal_id, allowed = false, reason = %reason, "Guardrail enforcer found flags without evidence");
            return Err(GuardrailViolation::new(
                proposal_id,
                "Validation evidence does not support sync",
                reason,
            )
            .into());
        }

        match (evidence.implementation, evidence.latest) {
            (Some(implementation), Some(latest)) => {
                info!(
                    proposal_id = %proposal_id,
                    implementation_id = %implementation.id,
                    validation_id = %latest.id,
                    allowed = true,
                    "Guardrail enforcer cleared sync"
                );
                Ok(GuardrailClearance {
                    proposal_id,
                    implementation_id: implementation.id,
                    validation_id: latest.id,
                })
            }
            _ => Err(AppError::Internal(format!(
                "guardrail evidence for proposal {} vanished after verdict",
                proposal_id
            ))),
        }
    }

    /// Tuple variant of [`Self::enforce`]; both agree on every state
    pub async fn check(&self, proposal_id: Uuid) -> (bool, String) {
        match self.enforce(proposal_id).await {
            Ok(clearance) => (
                true,
                format!(
                    "status and implementation_status are validated and validation {} passed",
                    clearance.validation_id
                ),
            ),
            Err(AppError::GuardrailViolation(violation)) => (false, violation.reason),
            Err(other) => (false, other.to_string()),
        }
    }

    /// Read-only sweep over every proposal that is linked or marked synced.
    /// Reports, never repairs.
    pub async fn audit_guardrail_violations(&self) -> Result<Vec<GuardrailFinding>, AppError> {
        let links = self.store.list_sync_links().await?;
        let proposals = self.store.list_proposals().await?;
        let mut findings = Vec::new();

        for proposal in proposals {
            let link = links.iter().find(|l| l.proposal_id == proposal.id);
            if link.is_none() && proposal.status != ProposalStatus::Synced {
                continue;
            }

            let mut problems = Vec::new();
            match (link, proposal.status) {
                (Some(_), ProposalStatus::Synced) => {}
                (Some(link), status) => problems.push(format!(
                    "linked to section '{}' but status={}",
                    link.section_title, status
                )),
                (None, _) => problems.push("status=synced without a section link".to_string()),
            }
            if proposal.implementation_status != ImplementationStatus::Validated {
                problems.push(format!(
                    "implementation_status={} but a synced proposal requires validated",
                    proposal.implementation_status
                ));
            }
            let evidence = ValidationEvidence::gather(self.store.as_ref(), proposal.id).await?;
            if let Err(reason) = evidence.verdict() {
                problems.push(reason);
            }

            if problems.is_empty() {
                debug!(proposal_id = %proposal.id, "Synced proposal passes audit");
                continue;
            }

            warn!(
                proposal_id = %proposal.id,
                status = %proposal.status,
                implementation_status = %proposal.implementation_status,
                problems = problems.len(),
                "Guardrail audit finding"
            );
            findings.push(GuardrailFinding {
                proposal_id: proposal.id,
                title: proposal.title,
                status: proposal.status,
                implementation_status: proposal.implementation_status,
                section: link.map(|l| l.section_title.clone()),
                problems,
            });
        }

        Ok(findings)
    }
}
