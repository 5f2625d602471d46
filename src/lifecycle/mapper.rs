//! Section mapper
//!
//! Classifies proposals into document sections and owns the one irreversible
//! action: publishing a validated proposal into its section.

use super::guardrail::{flag_condition, GuardrailEnforcer};
use super::{DocumentSection, ImplementationStatus, Proposal, ProposalStatus, SyncLink};
use crate::config::LifecycleConfig;
use crate::error::AppError;
use crate::store::{GraphStore, SyncWrite, SyncWriteOutcome};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Section used when no rule matches
pub const FALLBACK_SECTION: &str = "System Overview";

/// One classification rule; rules are tried in table order
#[derive(Debug, Clone, Copy)]
pub struct SectionRule {
    pub section: &'static str,
    /// Alternation of word stems, matched case-insensitively at word starts
    pub pattern: &'static str,
}

pub const SECTION_RULES: &[SectionRule] = &[
    SectionRule {
        section: "Security Architecture",
        pattern: r"secur\w*|auth\w*|permission\w*|rate[- ]?limit\w*|encrypt\w*|secrets?|credential\w*|vulnerab\w*|sandbox\w*|injection",
    },
    SectionRule {
        section: "Data Layer",
        pattern: r"database\w*|schema\w*|migration\w*|storage|persist\w*|quer(?:y|ies)|index\w*|graph store",
    },
    SectionRule {
        section: "API Surface",
        pattern: r"api|endpoints?|routes?|rest|http|webhooks?|graphql",
    },
    SectionRule {
        section: "Deployment & Operations",
        pattern: r"deploy\w*|rollout|rollback|docker\w*|kubernetes|infra\w*|monitor\w*|observab\w*|logging|alert\w*",
    },
    SectionRule {
        section: "Agent Coordination",
        pattern: r"agents?|orchestrat\w*|delegat\w*|handoff|workflow\w*|task queue",
    },
    SectionRule {
        section: "Communication Channels",
        pattern: r"chat|slack|discord|telegram|channels?|messag\w*|notif\w*",
    },
    SectionRule {
        section: "Performance",
        pattern: r"perform\w*|latency|cach\w*|throughput|optimi[sz]\w*|speed\w*|memory",
    },
    SectionRule {
        section: "Testing & Quality",
        pattern: r"tests?|testing|coverage|lint\w*|quality|regression\w*",
    },
];

static COMPILED_RULES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    SECTION_RULES
        .iter()
        .map(|rule| {
            let regex = Regex::new(&format!(r"(?i)\b(?:{})\b", rule.pattern))
                .expect("valid section rule pattern");
            (rule.section, regex)
        })
        .collect()
});

/// First matching section for the text, or [`FALLBACK_SECTION`]
pub fn classify(title: &str, description: &str) -> &'static str {
    let text = format!("{}\n{}", title, description);
    COMPILED_RULES
        .iter()
        .find(|(_, regex)| regex.is_match(&text))
        .map(|(section, _)| *section)
        .unwrap_or(FALLBACK_SECTION)
}

/// Outcome of the read-only guardrail check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDecision {
    pub proposal_id: Uuid,
    pub allowed: bool,
    pub reason: String,
    pub status: ProposalStatus,
    pub implementation_status: ImplementationStatus,
}

/// Outcome of a sync attempt. Refusals come back as `allowed == false`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub proposal_id: Uuid,
    pub allowed: bool,
    pub reason: String,
    /// The proposal was already published; nothing was written
    pub already_synced: bool,
    pub section: Option<DocumentSection>,
    pub linked_at: Option<DateTime<Utc>>,
}

impl SyncOutcome {
    fn denied(proposal_id: Uuid, reason: String) -> Self {
        Self {
            proposal_id,
            allowed: false,
            reason,
            already_synced: false,
            section: None,
            linked_at: None,
        }
    }
}

#[derive(Clone)]
pub struct SectionMapper {
    store: Arc<dyn GraphStore>,
    enforcer: GuardrailEnforcer,
    config: LifecycleConfig,
}

impl SectionMapper {
    pub fn new(store: Arc<dyn GraphStore>, config: LifecycleConfig) -> Self {
        Self {
            enforcer: GuardrailEnforcer::new(store.clone()),
            store,
            config,
        }
    }

    /// Classify and persist `target_section`. Safe to re-run.
    pub async fn assign_section(&self, proposal_id: Uuid) -> Result<Proposal, AppError> {
        let mut proposal = self.proposal(proposal_id).await?;
        let section = classify(&proposal.title, &proposal.description);

        if !self
            .store
            .set_target_section(proposal_id, section, Utc::now())
            .await?
        {
            return Err(not_found(proposal_id));
        }
        debug!(proposal_id = %proposal_id, section = section, "Section assigned");

        proposal.target_section = Some(section.to_string());
        Ok(proposal)
    }

    /// Primary guardrail. Pure read.
    pub async fn check_can_sync(&self, proposal_id: Uuid) -> Result<SyncDecision, AppError> {
        let proposal = self.proposal(proposal_id).await?;
        let decision = match flag_condition(proposal.status, proposal.implementation_status) {
            Ok(()) => SyncDecision {
                proposal_id,
                allowed: true,
                reason: format!(
                    "status={} and implementation_status={}",
                    proposal.status, proposal.implementation_status
                ),
                status: proposal.status,
                implementation_status: proposal.implementation_status,
            },
            Err(reason) => SyncDecision {
                proposal_id,
                allowed: false,
                reason,
                status: proposal.status,
                implementation_status: proposal.implementation_status,
            },
        };

        info!(
            proposal_id = %proposal_id,
            allowed = decision.allowed,
            reason = %decision.reason,
            "Sync guardrail checked"
        );
        Ok(decision)
    }

    /// Publish a validated proposal into `section_title`. The guardrail is
    /// re-run here, and the section upsert, link and status flip are one
    /// conditional store write.
    pub async fn mark_synced(
        &self,
        proposal_id: Uuid,
        section_title: &str,
    ) -> Result<SyncOutcome, AppError> {
        let section_title = section_title.trim();
        if section_title.is_empty() {
            return Err(AppError::Validation("Section title must not be empty".into()));
        }

        let proposal = self.proposal(proposal_id).await?;
        if proposal.status == ProposalStatus::Synced {
            if let Some(link) = self.store.get_sync_link(proposal_id).await? {
                return self.already_synced(link).await;
            }
        }

        let decision = self.check_can_sync(proposal_id).await?;
        if !decision.allowed {
            warn!(proposal_id = %proposal_id, reason = %decision.reason, "Sync refused");
            return Ok(SyncOutcome::denied(proposal_id, decision.reason));
        }

        if self.config.strict_sync_guardrail {
            let (allowed, reason) = self.enforcer.check(proposal_id).await;
            if !allowed {
                warn!(proposal_id = %proposal_id, reason = %reason, "Sync refused by enforcer");
                return Ok(SyncOutcome::denied(proposal_id, reason));
            }
        }

        let write = SyncWrite {
            proposal_id,
            section_title: section_title.to_string(),
            reason: format!("published to section '{}'", section_title),
            linked_at: Utc::now(),
        };
        match self.store.sync_proposal(&write).await? {
            SyncWriteOutcome::Linked { section, link } => {
                info!(
                    proposal_id = %proposal_id,
                    from = %ProposalStatus::Validated,
                    to = %ProposalStatus::Synced,
                    section = %section.title,
                    "Proposal synced"
                );
                Ok(SyncOutcome {
                    proposal_id,
                    allowed: true,
                    reason: write.reason,
                    already_synced: false,
                    section: Some(section),
                    linked_at: Some(link.linked_at),
                })
            }
            SyncWriteOutcome::AlreadyLinked { link } => self.already_synced(link).await,
            SyncWriteOutcome::Refused {
                status,
                implementation_status,
            } => {
                let reason = flag_condition(status, implementation_status)
                    .err()
                    .unwrap_or_else(|| "proposal changed during sync".to_string());
                warn!(proposal_id = %proposal_id, reason = %reason, "Sync lost a race");
                Ok(SyncOutcome::denied(proposal_id, reason))
            }
            SyncWriteOutcome::Missing => Err(not_found(proposal_id)),
        }
    }

    /// Validated proposals without a section link, newest first
    pub async fn ready_to_sync(&self) -> Vec<Proposal> {
        match self.store.list_ready_to_sync().await {
            Ok(proposals) => proposals,
            Err(e) => {
                error!(error = %e, "Failed to list proposals ready to sync");
                Vec::new()
            }
        }
    }

    async fn already_synced(&self, link: SyncLink) -> Result<SyncOutcome, AppError> {
        let section = self.store.get_section(&link.section_title).await?;
        debug!(proposal_id = %link.proposal_id, section = %link.section_title, "Proposal already synced");
        Ok(SyncOutcome {
            proposal_id: link.proposal_id,
            allowed: true,
            reason: format!("already synced to section '{}'", link.section_title),
            already_synced: true,
            section,
            linked_at: Some(link.linked_at),
        })
    }

    async fn proposal(&self, proposal_id: Uuid) -> Result<Proposal, AppError> {
        self.store
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| not_found(proposal_id))
    }
}

fn not_found(proposal_id: Uuid) -> AppError {
    AppError::NotFound(format!("Proposal {} not found", proposal_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGraphStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_rule_compiles_and_is_reachable() {
        assert_eq!(COMPILED_RULES.len(), SECTION_RULES.len());
        let samples = [
            ("Add rate limiting", "Security Architecture"),
            ("Index the proposals table", "Data Layer"),
            ("Version the endpoints", "API Surface"),
            ("Canary rollout for releases", "Deployment & Operations"),
            ("Better handoff between agents", "Agent Coordination"),
            ("Send a Slack notification", "Communication Channels"),
            ("Reduce latency of replies", "Performance"),
            ("Raise test coverage", "Testing & Quality"),
        ];
        for (rule, (title, expected)) in SECTION_RULES.iter().zip(samples) {
            assert_eq!(rule.section, expected);
            assert_eq!(classify(title, ""), expected, "title: {}", title);
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        assert_eq!(
            classify("Cache auth tokens", "speed up the login endpoint"),
            "Security Architecture"
        );
        assert_eq!(classify("Faster queries", "cache results"), "Data Layer");
    }

    #[test]
    fn test_matching_is_case_insensitive_and_word_bounded() {
        assert_eq!(classify("ENCRYPT payloads", ""), "Security Architecture");
        // "rapid" must not match the "api" rule
        assert_eq!(classify("Rapid prototyping", "sketches"), FALLBACK_SECTION);
    }

    #[test]
    fn test_unmatched_text_falls_back() {
        assert_eq!(classify("Rename the mascot", "purely cosmetic"), FALLBACK_SECTION);
    }

    #[tokio::test]
    async fn test_assign_section_is_idempotent() {
        let store = Arc::new(MemoryGraphStore::new());
        let proposal = Proposal::new(None, "Add rate limiting".into(), "throttle".into(), None);
        store.insert_proposal(&proposal).await.unwrap();
        let mapper = SectionMapper::new(store.clone(), LifecycleConfig::default());

        let first = mapper.assign_section(proposal.id).await.unwrap();
        let second = mapper.assign_section(proposal.id).await.unwrap();
        assert_eq!(first.target_section.as_deref(), Some("Security Architecture"));
        assert_eq!(first.target_section, second.target_section);

        let stored = store.get_proposal(proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, proposal.status);
        assert_eq!(stored.target_section.as_deref(), Some("Security Architecture"));
    }

    #[tokio::test]
    async fn test_check_can_sync_is_pure() {
        let store = Arc::new(MemoryGraphStore::new());
        let proposal = Proposal::new(None, "Pure".into(), "read".into(), None);
        store.insert_proposal(&proposal).await.unwrap();
        let mapper = SectionMapper::new(store.clone(), LifecycleConfig::default());

        let first = mapper.check_can_sync(proposal.id).await.unwrap();
        let second = mapper.check_can_sync(proposal.id).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.allowed);
        assert!(first.reason.contains("implementation_status=not_started"));
        assert_eq!(store.get_proposal(proposal.id).await.unwrap().unwrap(), proposal);
    }

    #[tokio::test]
    async fn test_strict_mode_blocks_flags_without_evidence() {
        let store = Arc::new(MemoryGraphStore::new());
        let proposal = Proposal::new(None, "Forged".into(), "flags".into(), None);
        store.insert_proposal(&proposal).await.unwrap();
        store
            .overwrite_proposal_state(
                proposal.id,
                ProposalStatus::Validated,
                ImplementationStatus::Validated,
            )
            .await;

        let strict = SectionMapper::new(store.clone(), LifecycleConfig::default());
        let outcome = strict.mark_synced(proposal.id, "System Overview").await.unwrap();
        assert!(!outcome.allowed);
        assert!(store.get_sync_link(proposal.id).await.unwrap().is_none());

        let lenient = SectionMapper::new(
            store.clone(),
            LifecycleConfig {
                strict_sync_guardrail: false,
                ..LifecycleConfig::default()
            },
        );
        let outcome = lenient.mark_synced(proposal.id, "System Overview").await.unwrap();
        assert!(outcome.allowed);
        assert!(store.get_sync_link(proposal.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mark_synced_rejects_blank_section() {
        let store = Arc::new(MemoryGraphStore::new());
        let mapper = SectionMapper::new(store, LifecycleConfig::default());
        assert!(matches!(
            mapper.mark_synced(Uuid::new_v4(), "  ").await,
            Err(AppError::Validation(_))
        ));
    }
}
