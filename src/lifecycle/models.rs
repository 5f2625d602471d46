//! Lifecycle data models
//!
//! Opportunities, proposals, vettings, implementations, validations and the
//! document sections a synced proposal finally lands in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A stored or requested value that names no known variant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}', expected one of: {expected}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
    pub expected: String,
}

/// Declares a snake_case text enum with `as_str`, `Display` and `FromStr`.
/// Variants are listed in ascending order, which `Ord` follows.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                        expected: $name::ALL
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    }),
                }
            }
        }
    };
}

text_enum! {
    /// Lifecycle status of a proposal
    ProposalStatus {
        Proposed => "proposed",
        UnderReview => "under_review",
        Approved => "approved",
        Implemented => "implemented",
        Validated => "validated",
        /// Published into the living document; nothing leaves this state
        Synced => "synced",
        Rejected => "rejected",
        Failed => "failed",
    }
}

impl Default for ProposalStatus {
    fn default() -> Self {
        ProposalStatus::Proposed
    }
}

text_enum! {
    /// Progress of the work behind a proposal, tracked apart from its lifecycle
    ImplementationStatus {
        NotStarted => "not_started",
        InProgress => "in_progress",
        Completed => "completed",
        Validated => "validated",
        Failed => "failed",
    }
}

impl Default for ImplementationStatus {
    fn default() -> Self {
        ImplementationStatus::NotStarted
    }
}

text_enum! {
    Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

text_enum! {
    OpportunityStatus {
        Open => "open",
        /// Evolved into a proposal
        Converted => "converted",
        Dismissed => "dismissed",
    }
}

text_enum! {
    /// Reviewer's verdict recorded on a vetting
    Recommendation {
        Approve => "approve",
        Reject => "reject",
        Revise => "revise",
    }
}

text_enum! {
    ValidationStatus {
        Passed => "passed",
        Failed => "failed",
    }
}

// =============================================================================
// OPPORTUNITY
// =============================================================================

/// A detected candidate for improvement, written by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: Uuid,
    pub kind: String,
    pub description: String,
    pub priority: Priority,
    pub status: OpportunityStatus,
    pub proposed_by: String,
    pub target_section: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn new(
        kind: String,
        description: String,
        priority: Priority,
        proposed_by: String,
        target_section: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description,
            priority,
            status: OpportunityStatus::Open,
            proposed_by,
            target_section,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// PROPOSAL
// =============================================================================

/// A formal, trackable unit of proposed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    /// Opportunity this proposal evolved from, if any
    pub opportunity_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub status: ProposalStatus,
    pub implementation_status: ImplementationStatus,
    pub priority: Priority,
    /// Document section chosen by the mapper
    pub target_section: Option<String>,
    pub previous_state: Option<ProposalStatus>,
    pub state_change_reason: Option<String>,
    pub state_change_metadata: Option<serde_json::Value>,
    pub state_changed_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(
        opportunity_id: Option<Uuid>,
        title: String,
        description: String,
        category: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            opportunity_id,
            title,
            description,
            category,
            status: ProposalStatus::Proposed,
            implementation_status: ImplementationStatus::NotStarted,
            priority: Priority::Medium,
            target_section: None,
            previous_state: None,
            state_change_reason: None,
            state_change_metadata: None,
            state_changed_at: None,
            synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// VETTING
// =============================================================================

/// One review cycle's risk assessment of a proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vetting {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub assessor: String,
    pub operational_impact: String,
    pub deployment_risk: Priority,
    pub rollout_strategy: String,
    pub recommendation: Recommendation,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// IMPLEMENTATION
// =============================================================================

/// The build work behind an approved proposal, owned by one assigned agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub assigned_to: String,
    pub status: ImplementationStatus,
    /// 0-100, never decreases while in progress
    pub progress: u8,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub validation_status: Option<ValidationStatus>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Implementation {
    pub fn new(proposal_id: Uuid, assigned_to: String, notes: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            proposal_id,
            assigned_to,
            status: ImplementationStatus::InProgress,
            progress: 0,
            notes,
            summary: None,
            validation_status: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// A failed implementation no longer blocks a new one
    pub fn is_active(&self) -> bool {
        self.status != ImplementationStatus::Failed
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub description: String,
    /// A failing critical check fails the whole validation
    pub critical: bool,
}

impl ValidationCheck {
    pub fn new(name: &str, passed: bool, description: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.to_string(),
            passed,
            description: description.into(),
            critical,
        }
    }
}

/// Immutable outcome of one run of the check battery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub id: Uuid,
    pub implementation_id: Uuid,
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
    pub failed_count: usize,
    pub validated_at: DateTime<Utc>,
}

impl Validation {
    pub fn from_checks(implementation_id: Uuid, checks: Vec<ValidationCheck>) -> Self {
        let passed = checks.iter().filter(|c| c.critical).all(|c| c.passed);
        let failed_count = checks.iter().filter(|c| !c.passed).count();
        Self {
            id: Uuid::new_v4(),
            implementation_id,
            passed,
            checks,
            failed_count,
            validated_at: Utc::now(),
        }
    }
}

// =============================================================================
// DOCUMENT SECTION & SYNC LINK
// =============================================================================

/// Addressable unit of the published living document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSection {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub order: i32,
    pub checksum: String,
    pub last_updated: DateTime<Utc>,
}

impl DocumentSection {
    /// A fresh, empty section; content is owned by the document renderer
    pub fn new(title: &str, order: i32, at: DateTime<Utc>) -> Self {
        Self {
            title: title.to_string(),
            slug: slugify(title),
            content: String::new(),
            order,
            checksum: content_checksum(""),
            last_updated: at,
        }
    }
}

/// The terminal Proposal -> DocumentSection link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLink {
    pub proposal_id: Uuid,
    pub section_title: String,
    pub linked_at: DateTime<Utc>,
}

/// Lowercase, hyphen-separated form of a section title
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Hex SHA-256 of section content
pub fn content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_text_round_trips_through_from_str() {
        for status in ProposalStatus::ALL {
            assert_eq!(status.as_str().parse::<ProposalStatus>(), Ok(*status));
        }
        assert!("merged".parse::<ProposalStatus>().is_err());
    }

    #[test]
    fn test_unknown_text_lists_expected_values() {
        let err = "maybe".parse::<Recommendation>().unwrap_err();
        assert_eq!(err.kind, "Recommendation");
        assert_eq!(err.expected, "approve, reject, revise");
        assert!(err.to_string().contains("expected one of: approve, reject, revise"));
    }

    #[test]
    fn test_serde_matches_text_form() {
        let json = serde_json::to_string(&ImplementationStatus::NotStarted).unwrap();
        assert_eq!(json, "\"not_started\"");
        let json = serde_json::to_string(&ProposalStatus::UnderReview).unwrap();
        assert_eq!(json, "\"under_review\"");
    }

    #[test]
    fn test_priority_orders_low_to_critical() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_new_proposal_defaults() {
        let proposal = Proposal::new(None, "Add rate limiting".into(), "Throttle".into(), None);
        assert_eq!(proposal.status, ProposalStatus::Proposed);
        assert_eq!(proposal.implementation_status, ImplementationStatus::NotStarted);
        assert_eq!(proposal.priority, Priority::Medium);
        assert!(proposal.previous_state.is_none());
    }

    #[test]
    fn test_validation_passes_despite_non_critical_failure() {
        let validation = Validation::from_checks(
            Uuid::new_v4(),
            vec![
                ValidationCheck::new("a", true, "", true),
                ValidationCheck::new("b", false, "", false),
            ],
        );
        assert!(validation.passed);
        assert_eq!(validation.failed_count, 1);
    }

    #[test]
    fn test_validation_fails_on_any_critical_failure() {
        let validation = Validation::from_checks(
            Uuid::new_v4(),
            vec![
                ValidationCheck::new("a", false, "", true),
                ValidationCheck::new("b", true, "", false),
            ],
        );
        assert!(!validation.passed);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Security Architecture"), "security-architecture");
        assert_eq!(slugify("Deployment & Operations"), "deployment-operations");
        assert_eq!(slugify("  API Surface!  "), "api-surface");
    }

    #[test]
    fn test_empty_section_checksum_is_sha256_of_empty() {
        let section = DocumentSection::new("System Overview", 1, Utc::now());
        assert_eq!(
            section.checksum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(section.slug, "system-overview");
    }
}
