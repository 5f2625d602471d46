//! PostgreSQL graph store
//!
//! Entities are tables and relationships are FK columns plus `sync_links`.
//! Statement text lives in [`super::queries`].

use super::queries;
use super::{
    GraphStore, ImplementationPatch, StatusChange, StatusWrite, StoreError, StoreResult,
    SyncWrite, SyncWriteOutcome,
};
use crate::config::DatabaseConfig;
use crate::lifecycle::{
    content_checksum, slugify, DocumentSection, Implementation, ImplementationStatus,
    Opportunity, OpportunityStatus, Proposal, ProposalStatus, SyncLink, Validation,
    ValidationCheck, Vetting,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::FromSql;
use tokio_postgres::{NoTls, Row};
use tracing::info;
use uuid::Uuid;

/// Store backed by a deadpool connection pool
#[derive(Clone)]
pub struct PgGraphStore {
    pool: Pool,
}

impl PgGraphStore {
    /// Build the pool (TLS when the config asks for it) and verify one connection
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.max_pool_size));

        let created = if config.require_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
            cfg.create_pool(Some(Runtime::Tokio1), tls)
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        };
        let pool = created
            .map_err(|e| StoreError::Unavailable(format!("Failed to create pool: {}", e)))?;

        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        drop(client);

        info!(
            host = %config.host,
            database = %config.database,
            tls = config.require_tls,
            "Store connection pool established"
        );

        Ok(Self { pool })
    }

    /// Create tables and indexes if they don't exist
    pub async fn migrate(&self) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(queries::CREATE_SCHEMA).await?;
        info!("Store schema initialized");
        Ok(())
    }
}

/// Unique and FK violations surface as `Constraint`
fn constraint_or_database(err: tokio_postgres::Error, what: &str) -> StoreError {
    match err.code() {
        Some(code)
            if *code == SqlState::UNIQUE_VIOLATION || *code == SqlState::FOREIGN_KEY_VIOLATION =>
        {
            StoreError::Constraint(format!("{}: {}", what, err))
        }
        _ => StoreError::Database(err),
    }
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> StoreResult<T> {
    row.try_get(name)
        .map_err(|e| StoreError::Decode(format!("column '{}': {}", name, e)))
}

fn parsed<T>(row: &Row, name: &str) -> StoreResult<T>
where
    T: std::str::FromStr<Err = crate::lifecycle::UnknownVariant>,
{
    Ok(column::<String>(row, name)?.parse()?)
}

fn parsed_opt<T>(row: &Row, name: &str) -> StoreResult<Option<T>>
where
    T: std::str::FromStr<Err = crate::lifecycle::UnknownVariant>,
{
    Ok(column::<Option<String>>(row, name)?
        .map(|s| s.parse())
        .transpose()?)
}

fn opportunity_from_row(row: &Row) -> StoreResult<Opportunity> {
    Ok(Opportunity {
        id: column(row, "id")?,
        kind: column(row, "kind")?,
        description: column(row, "description")?,
        priority: parsed(row, "priority")?,
        status: parsed(row, "status")?,
        proposed_by: column(row, "proposed_by")?,
        target_section: column(row, "target_section")?,
        created_at: column(row, "created_at")?,
    })
}

fn proposal_from_row(row: &Row) -> StoreResult<Proposal> {
    Ok(Proposal {
        id: column(row, "id")?,
        opportunity_id: column(row, "opportunity_id")?,
        title: column(row, "title")?,
        description: column(row, "description")?,
        category: column(row, "category")?,
        status: parsed(row, "status")?,
        implementation_status: parsed(row, "implementation_status")?,
        priority: parsed(row, "priority")?,
        target_section: column(row, "target_section")?,
        previous_state: parsed_opt(row, "previous_state")?,
        state_change_reason: column(row, "state_change_reason")?,
        state_change_metadata: column(row, "state_change_metadata")?,
        state_changed_at: column(row, "state_changed_at")?,
        synced_at: column(row, "synced_at")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn vetting_from_row(row: &Row) -> StoreResult<Vetting> {
    Ok(Vetting {
        id: column(row, "id")?,
        proposal_id: column(row, "proposal_id")?,
        assessor: column(row, "assessor")?,
        operational_impact: column(row, "operational_impact")?,
        deployment_risk: parsed(row, "deployment_risk")?,
        rollout_strategy: column(row, "rollout_strategy")?,
        recommendation: parsed(row, "recommendation")?,
        created_at: column(row, "created_at")?,
    })
}

fn implementation_from_row(row: &Row) -> StoreResult<Implementation> {
    let progress: i32 = column(row, "progress")?;
    Ok(Implementation {
        id: column(row, "id")?,
        proposal_id: column(row, "proposal_id")?,
        assigned_to: column(row, "assigned_to")?,
        status: parsed(row, "status")?,
        progress: u8::try_from(progress)
            .map_err(|_| StoreError::Decode(format!("progress {} out of range", progress)))?,
        notes: column(row, "notes")?,
        summary: column(row, "summary")?,
        validation_status: parsed_opt(row, "validation_status")?,
        started_at: column(row, "started_at")?,
        updated_at: column(row, "updated_at")?,
        completed_at: column(row, "completed_at")?,
    })
}

fn validation_from_row(row: &Row) -> StoreResult<Validation> {
    let checks: serde_json::Value = column(row, "checks")?;
    let checks: Vec<ValidationCheck> = serde_json::from_value(checks)
        .map_err(|e| StoreError::Decode(format!("validation checks: {}", e)))?;
    let failed_count: i32 = column(row, "failed_count")?;
    Ok(Validation {
        id: column(row, "id")?,
        implementation_id: column(row, "implementation_id")?,
        passed: column(row, "passed")?,
        checks,
        failed_count: usize::try_from(failed_count).unwrap_or_default(),
        validated_at: column(row, "validated_at")?,
    })
}

fn section_from_row(row: &Row) -> StoreResult<DocumentSection> {
    Ok(DocumentSection {
        title: column(row, "title")?,
        slug: column(row, "slug")?,
        content: column(row, "content")?,
        order: column(row, "sort_order")?,
        checksum: column(row, "checksum")?,
        last_updated: column(row, "last_updated")?,
    })
}

fn sync_link_from_row(row: &Row) -> StoreResult<SyncLink> {
    Ok(SyncLink {
        proposal_id: column(row, "proposal_id")?,
        section_title: column(row, "section_title")?,
        linked_at: column(row, "linked_at")?,
    })
}

/// Decode the `(status, applied)` row returned by the conditional status writes
fn status_write(row: Option<Row>) -> StoreResult<StatusWrite> {
    let Some(row) = row else {
        return Ok(StatusWrite::Missing);
    };
    if column::<bool>(&row, "applied")? {
        Ok(StatusWrite::Applied)
    } else {
        Ok(StatusWrite::Stale {
            current: parsed(&row, "status")?,
        })
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn insert_opportunity(&self, o: &Opportunity) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                queries::INSERT_OPPORTUNITY,
                &[
                    &o.id,
                    &o.kind,
                    &o.description,
                    &o.priority.as_str(),
                    &o.status.as_str(),
                    &o.proposed_by,
                    &o.target_section,
                    &o.created_at,
                ],
            )
            .await
            .map_err(|e| constraint_or_database(e, "insert opportunity"))?;
        Ok(())
    }

    async fn get_opportunity(&self, id: Uuid) -> StoreResult<Option<Opportunity>> {
        let client = self.pool.get().await?;
        let row = client.query_opt(queries::GET_OPPORTUNITY, &[&id]).await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    async fn list_opportunities(
        &self,
        status: OpportunityStatus,
        limit: usize,
    ) -> StoreResult<Vec<Opportunity>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                queries::LIST_OPPORTUNITIES_BY_STATUS,
                &[&status.as_str(), &limit_param(limit)],
            )
            .await?;
        rows.iter().map(opportunity_from_row).collect()
    }

    async fn insert_proposal(&self, p: &Proposal) -> StoreResult<()> {
        let client = self.pool.get().await?;
        let status = p.status.as_str();
        let implementation_status = p.implementation_status.as_str();
        let priority = p.priority.as_str();
        let previous_state = p.previous_state.map(|s| s.as_str());
        let params: [&(dyn tokio_postgres::types::ToSql + Sync); 16] = [
            &p.id,
            &p.opportunity_id,
            &p.title,
            &p.description,
            &p.category,
            &status,
            &implementation_status,
            &priority,
            &p.target_section,
            &previous_state,
            &p.state_change_reason,
            &p.state_change_metadata,
            &p.state_changed_at,
            &p.synced_at,
            &p.created_at,
            &p.updated_at,
        ];

        match p.opportunity_id {
            None => {
                client
                    .execute(queries::INSERT_PROPOSAL, &params)
                    .await
                    .map_err(|e| constraint_or_database(e, "insert proposal"))?;
            }
            Some(opportunity_id) => {
                let inserted = client
                    .execute(queries::INSERT_PROPOSAL_FROM_OPPORTUNITY, &params)
                    .await
                    .map_err(|e| constraint_or_database(e, "insert proposal"))?;
                if inserted == 0 {
                    return Err(StoreError::Constraint(format!(
                        "opportunity {} is missing or already evolved into a proposal",
                        opportunity_id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> StoreResult<Option<Proposal>> {
        let client = self.pool.get().await?;
        let row = client.query_opt(queries::GET_PROPOSAL, &[&id]).await?;
        row.as_ref().map(proposal_from_row).transpose()
    }

    async fn list_proposals_by_status(
        &self,
        status: ProposalStatus,
        limit: usize,
    ) -> StoreResult<Vec<Proposal>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                queries::LIST_PROPOSALS_BY_STATUS,
                &[&status.as_str(), &limit_param(limit)],
            )
            .await?;
        rows.iter().map(proposal_from_row).collect()
    }

    async fn list_proposals(&self) -> StoreResult<Vec<Proposal>> {
        let client = self.pool.get().await?;
        let rows = client.query(queries::LIST_PROPOSALS, &[]).await?;
        rows.iter().map(proposal_from_row).collect()
    }

    async fn change_status(&self, id: Uuid, change: &StatusChange) -> StoreResult<StatusWrite> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                queries::CHANGE_STATUS,
                &[
                    &id,
                    &change.expected.as_str(),
                    &change.target.as_str(),
                    &change.reason,
                    &change.metadata,
                    &change.changed_at,
                ],
            )
            .await?;
        status_write(row)
    }

    async fn set_implementation_status(
        &self,
        id: Uuid,
        status: ImplementationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(queries::SET_IMPLEMENTATION_STATUS, &[&id, &status.as_str(), &at])
            .await?;
        Ok(updated > 0)
    }

    async fn set_target_section(
        &self,
        id: Uuid,
        section: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(queries::SET_TARGET_SECTION, &[&id, &section, &at])
            .await?;
        Ok(updated > 0)
    }

    async fn promote_validated(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusWrite> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(queries::PROMOTE_VALIDATED, &[&id, &reason, &at])
            .await?;
        status_write(row)
    }

    async fn insert_vetting(&self, v: &Vetting) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                queries::INSERT_VETTING,
                &[
                    &v.id,
                    &v.proposal_id,
                    &v.assessor,
                    &v.operational_impact,
                    &v.deployment_risk.as_str(),
                    &v.rollout_strategy,
                    &v.recommendation.as_str(),
                    &v.created_at,
                ],
            )
            .await
            .map_err(|e| constraint_or_database(e, "insert vetting"))?;
        Ok(())
    }

    async fn list_vettings(&self, proposal_id: Uuid) -> StoreResult<Vec<Vetting>> {
        let client = self.pool.get().await?;
        let rows = client.query(queries::LIST_VETTINGS, &[&proposal_id]).await?;
        rows.iter().map(vetting_from_row).collect()
    }

    async fn insert_implementation(&self, i: &Implementation) -> StoreResult<()> {
        let client = self.pool.get().await?;
        let validation_status = i.validation_status.map(|s| s.as_str());
        client
            .execute(
                queries::INSERT_IMPLEMENTATION,
                &[
                    &i.id,
                    &i.proposal_id,
                    &i.assigned_to,
                    &i.status.as_str(),
                    &i32::from(i.progress),
                    &i.notes,
                    &i.summary,
                    &validation_status,
                    &i.started_at,
                    &i.updated_at,
                    &i.completed_at,
                ],
            )
            .await
            .map_err(|e| constraint_or_database(e, "insert implementation"))?;
        Ok(())
    }

    async fn get_implementation(&self, id: Uuid) -> StoreResult<Option<Implementation>> {
        let client = self.pool.get().await?;
        let row = client.query_opt(queries::GET_IMPLEMENTATION, &[&id]).await?;
        row.as_ref().map(implementation_from_row).transpose()
    }

    async fn active_implementation(
        &self,
        proposal_id: Uuid,
    ) -> StoreResult<Option<Implementation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(queries::ACTIVE_IMPLEMENTATION, &[&proposal_id])
            .await?;
        row.as_ref().map(implementation_from_row).transpose()
    }

    async fn update_implementation(
        &self,
        id: Uuid,
        patch: &ImplementationPatch,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Implementation>> {
        let client = self.pool.get().await?;
        let status = patch.status.map(|s| s.as_str());
        let progress = patch.progress.map(i32::from);
        let validation_status = patch.validation_status.map(|s| s.as_str());
        let row = client
            .query_opt(
                queries::UPDATE_IMPLEMENTATION,
                &[
                    &id,
                    &status,
                    &progress,
                    &patch.notes,
                    &patch.summary,
                    &validation_status,
                    &patch.completed_at,
                    &at,
                ],
            )
            .await
            .map_err(|e| constraint_or_database(e, "update implementation"))?;
        row.as_ref().map(implementation_from_row).transpose()
    }

    async fn insert_validation(&self, v: &Validation) -> StoreResult<()> {
        let client = self.pool.get().await?;
        let checks = serde_json::to_value(&v.checks)
            .map_err(|e| StoreError::Decode(format!("validation checks: {}", e)))?;
        let failed_count = i32::try_from(v.failed_count).unwrap_or(i32::MAX);
        client
            .execute(
                queries::INSERT_VALIDATION,
                &[
                    &v.id,
                    &v.implementation_id,
                    &v.passed,
                    &checks,
                    &failed_count,
                    &v.validated_at,
                ],
            )
            .await
            .map_err(|e| constraint_or_database(e, "insert validation"))?;
        Ok(())
    }

    async fn list_validations(&self, implementation_id: Uuid) -> StoreResult<Vec<Validation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(queries::LIST_VALIDATIONS, &[&implementation_id])
            .await?;
        rows.iter().map(validation_from_row).collect()
    }

    async fn get_section(&self, title: &str) -> StoreResult<Option<DocumentSection>> {
        let client = self.pool.get().await?;
        let row = client.query_opt(queries::GET_SECTION, &[&title]).await?;
        row.as_ref().map(section_from_row).transpose()
    }

    async fn sync_proposal(&self, write: &SyncWrite) -> StoreResult<SyncWriteOutcome> {
        let client = self.pool.get().await?;
        let slug = slugify(&write.section_title);
        let checksum = content_checksum("");
        let row = client
            .query_opt(
                queries::SYNC_PROPOSAL,
                &[
                    &write.proposal_id,
                    &write.section_title,
                    &slug,
                    &checksum,
                    &write.linked_at,
                    &write.reason,
                ],
            )
            .await?;

        let Some(row) = row else {
            return Ok(SyncWriteOutcome::Missing);
        };

        if column::<bool>(&row, "linked")? {
            let section = client
                .query_opt(queries::GET_SECTION, &[&write.section_title])
                .await?
                .as_ref()
                .map(section_from_row)
                .transpose()?
                .ok_or_else(|| {
                    StoreError::Decode(format!("section '{}' vanished", write.section_title))
                })?;
            return Ok(SyncWriteOutcome::Linked {
                section,
                link: SyncLink {
                    proposal_id: write.proposal_id,
                    section_title: write.section_title.clone(),
                    linked_at: write.linked_at,
                },
            });
        }

        let existing = client
            .query_opt(queries::GET_SYNC_LINK, &[&write.proposal_id])
            .await?;
        if let Some(link) = existing.as_ref().map(sync_link_from_row).transpose()? {
            return Ok(SyncWriteOutcome::AlreadyLinked { link });
        }

        Ok(SyncWriteOutcome::Refused {
            status: parsed(&row, "status")?,
            implementation_status: parsed(&row, "implementation_status")?,
        })
    }

    async fn get_sync_link(&self, proposal_id: Uuid) -> StoreResult<Option<SyncLink>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(queries::GET_SYNC_LINK, &[&proposal_id])
            .await?;
        row.as_ref().map(sync_link_from_row).transpose()
    }

    async fn list_sync_links(&self) -> StoreResult<Vec<SyncLink>> {
        let client = self.pool.get().await?;
        let rows = client.query(queries::LIST_SYNC_LINKS, &[]).await?;
        rows.iter().map(sync_link_from_row).collect()
    }

    async fn list_ready_to_sync(&self) -> StoreResult<Vec<Proposal>> {
        let client = self.pool.get().await?;
        let rows = client.query(queries::LIST_READY_TO_SYNC, &[]).await?;
        rows.iter().map(proposal_from_row).collect()
    }
}
