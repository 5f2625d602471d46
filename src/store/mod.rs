//! Persistent store adapter
//!
//! Lifecycle components reach storage only through [`GraphStore`], handed to
//! each component at construction. Every trait method is one store operation:
//! an implementation must apply all fields of a call atomically, since callers
//! never get a transaction spanning several calls.

mod memory;
mod postgres;
pub mod queries;

pub use memory::MemoryGraphStore;
pub use postgres::PgGraphStore;

use crate::lifecycle::{
    DocumentSection, Implementation, ImplementationStatus, Opportunity, OpportunityStatus,
    Priority, Proposal, ProposalStatus, SyncLink, UnknownVariant, Validation, ValidationStatus,
    Vetting,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Undecodable record: {0}")]
    Decode(String),
}

impl From<UnknownVariant> for StoreError {
    fn from(err: UnknownVariant) -> Self {
        StoreError::Decode(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Compare-and-set write of a proposal's lifecycle status
#[derive(Debug, Clone)]
pub struct StatusChange {
    /// Status the caller observed; the write is skipped if it moved since
    pub expected: ProposalStatus,
    pub target: ProposalStatus,
    pub reason: String,
    pub metadata: Option<serde_json::Value>,
    pub changed_at: DateTime<Utc>,
}

/// Outcome of a conditional proposal write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    Applied,
    Stale { current: ProposalStatus },
    Missing,
}

/// Fields to overwrite on an implementation; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct ImplementationPatch {
    pub status: Option<ImplementationStatus>,
    pub progress: Option<u8>,
    pub notes: Option<String>,
    pub summary: Option<String>,
    pub validation_status: Option<ValidationStatus>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The single conditional write behind `markSynced`
#[derive(Debug, Clone)]
pub struct SyncWrite {
    pub proposal_id: Uuid,
    pub section_title: String,
    pub reason: String,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncWriteOutcome {
    /// Section upserted, link created, status flipped to synced
    Linked {
        section: DocumentSection,
        link: SyncLink,
    },
    /// A terminal link already existed; nothing was written
    AlreadyLinked { link: SyncLink },
    /// Status or implementation status no longer allow the sync
    Refused {
        status: ProposalStatus,
        implementation_status: ImplementationStatus,
    },
    Missing,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    // -- opportunities --------------------------------------------------------

    async fn insert_opportunity(&self, opportunity: &Opportunity) -> StoreResult<()>;

    async fn get_opportunity(&self, id: Uuid) -> StoreResult<Option<Opportunity>>;

    /// Priority desc, then newest first
    async fn list_opportunities(
        &self,
        status: OpportunityStatus,
        limit: usize,
    ) -> StoreResult<Vec<Opportunity>>;

    // -- proposals ------------------------------------------------------------

    /// Writes a new proposal. When it names an opportunity, that opportunity is
    /// claimed (open -> converted) in the same operation; a missing or already
    /// claimed opportunity fails with `Constraint`.
    async fn insert_proposal(&self, proposal: &Proposal) -> StoreResult<()>;

    async fn get_proposal(&self, id: Uuid) -> StoreResult<Option<Proposal>>;

    /// Priority desc, then newest first
    async fn list_proposals_by_status(
        &self,
        status: ProposalStatus,
        limit: usize,
    ) -> StoreResult<Vec<Proposal>>;

    async fn list_proposals(&self) -> StoreResult<Vec<Proposal>>;

    async fn change_status(&self, id: Uuid, change: &StatusChange) -> StoreResult<StatusWrite>;

    /// Returns false when the proposal does not exist
    async fn set_implementation_status(
        &self,
        id: Uuid,
        status: ImplementationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn set_target_section(&self, id: Uuid, section: &str, at: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Sets implementation_status and status to validated together. Skipped
    /// (Stale) when the proposal is synced, rejected or failed.
    async fn promote_validated(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusWrite>;

    // -- vettings -------------------------------------------------------------

    async fn insert_vetting(&self, vetting: &Vetting) -> StoreResult<()>;

    /// Newest first
    async fn list_vettings(&self, proposal_id: Uuid) -> StoreResult<Vec<Vetting>>;

    // -- implementations ------------------------------------------------------

    /// Fails with `Constraint` if the proposal already has an active implementation
    async fn insert_implementation(&self, implementation: &Implementation) -> StoreResult<()>;

    async fn get_implementation(&self, id: Uuid) -> StoreResult<Option<Implementation>>;

    async fn active_implementation(&self, proposal_id: Uuid)
        -> StoreResult<Option<Implementation>>;

    async fn update_implementation(
        &self,
        id: Uuid,
        patch: &ImplementationPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Implementation>>;

    // -- validations ----------------------------------------------------------

    async fn insert_validation(&self, validation: &Validation) -> StoreResult<()>;

    /// Newest first
    async fn list_validations(&self, implementation_id: Uuid) -> StoreResult<Vec<Validation>>;

    // -- document sections & terminal link ------------------------------------

    async fn get_section(&self, title: &str) -> StoreResult<Option<DocumentSection>>;

    async fn sync_proposal(&self, write: &SyncWrite) -> StoreResult<SyncWriteOutcome>;

    async fn get_sync_link(&self, proposal_id: Uuid) -> StoreResult<Option<SyncLink>>;

    async fn list_sync_links(&self) -> StoreResult<Vec<SyncLink>>;

    /// Validated proposals without a terminal link, newest first
    async fn list_ready_to_sync(&self) -> StoreResult<Vec<Proposal>>;
}

/// Work-queue ordering: priority desc, then recency desc
pub(crate) fn queue_order(a: (Priority, DateTime<Utc>), b: (Priority, DateTime<Utc>)) -> Ordering {
    b.0.cmp(&a.0).then(b.1.cmp(&a.1))
}
