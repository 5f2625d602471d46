//! SQL query constants
//!
//! Contains the schema and every statement used by the PostgreSQL store.
//! Compound writes are single statements (data-modifying CTEs), so each one
//! commits or fails as a whole.

/// Idempotent schema, applied at startup
pub const CREATE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS opportunities (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        description TEXT NOT NULL,
        priority TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'open',
        proposed_by TEXT NOT NULL,
        target_section TEXT,
        created_at TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS proposals (
        id UUID PRIMARY KEY,
        opportunity_id UUID UNIQUE REFERENCES opportunities(id),
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        category TEXT,
        status TEXT NOT NULL DEFAULT 'proposed',
        implementation_status TEXT NOT NULL DEFAULT 'not_started',
        priority TEXT NOT NULL DEFAULT 'medium',
        target_section TEXT,
        previous_state TEXT,
        state_change_reason TEXT,
        state_change_metadata JSONB,
        state_changed_at TIMESTAMPTZ,
        synced_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS vettings (
        id UUID PRIMARY KEY,
        proposal_id UUID NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
        assessor TEXT NOT NULL,
        operational_impact TEXT NOT NULL,
        deployment_risk TEXT NOT NULL,
        rollout_strategy TEXT NOT NULL,
        recommendation TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS implementations (
        id UUID PRIMARY KEY,
        proposal_id UUID NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
        assigned_to TEXT NOT NULL,
        status TEXT NOT NULL,
        progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
        notes TEXT,
        summary TEXT,
        validation_status TEXT,
        started_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ
    );

    CREATE TABLE IF NOT EXISTS validations (
        id UUID PRIMARY KEY,
        implementation_id UUID NOT NULL REFERENCES implementations(id) ON DELETE CASCADE,
        passed BOOLEAN NOT NULL,
        checks JSONB NOT NULL,
        failed_count INTEGER NOT NULL,
        validated_at TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS document_sections (
        title TEXT PRIMARY KEY,
        slug TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        sort_order INTEGER NOT NULL,
        checksum TEXT NOT NULL,
        last_updated TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sync_links (
        proposal_id UUID PRIMARY KEY REFERENCES proposals(id) ON DELETE CASCADE,
        section_title TEXT NOT NULL,
        linked_at TIMESTAMPTZ NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status);
    CREATE INDEX IF NOT EXISTS idx_proposals_implementation_status ON proposals(implementation_status);
    CREATE INDEX IF NOT EXISTS idx_opportunities_status ON opportunities(status);
    CREATE INDEX IF NOT EXISTS idx_vettings_proposal_id ON vettings(proposal_id);
    CREATE INDEX IF NOT EXISTS idx_validations_implementation_id ON validations(implementation_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_implementations_one_active
        ON implementations(proposal_id) WHERE status <> 'failed';
"#;

// =============================================================================
// OPPORTUNITIES
// =============================================================================

pub const INSERT_OPPORTUNITY: &str = r#"
    INSERT INTO opportunities (id, kind, description, priority, status, proposed_by, target_section, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

pub const GET_OPPORTUNITY: &str = "SELECT * FROM opportunities WHERE id = $1";

pub const LIST_OPPORTUNITIES_BY_STATUS: &str = r#"
    SELECT * FROM opportunities
    WHERE status = $1
    ORDER BY CASE priority
        WHEN 'critical' THEN 3 WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0
    END DESC, created_at DESC
    LIMIT $2
"#;

// =============================================================================
// PROPOSALS
// =============================================================================

pub const INSERT_PROPOSAL: &str = r#"
    INSERT INTO proposals (
        id, opportunity_id, title, description, category, status, implementation_status,
        priority, target_section, previous_state, state_change_reason, state_change_metadata,
        state_changed_at, synced_at, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
"#;

/// Claims an open opportunity and writes the proposal evolved from it.
/// Inserts nothing when the opportunity is missing or no longer open.
pub const INSERT_PROPOSAL_FROM_OPPORTUNITY: &str = r#"
    WITH claimed AS (
        UPDATE opportunities SET status = 'converted'
        WHERE id = $2 AND status = 'open'
        RETURNING id
    )
    INSERT INTO proposals (
        id, opportunity_id, title, description, category, status, implementation_status,
        priority, target_section, previous_state, state_change_reason, state_change_metadata,
        state_changed_at, synced_at, created_at, updated_at
    )
    SELECT $1::uuid, claimed.id, $3::text, $4::text, $5::text, $6::text, $7::text,
           $8::text, $9::text, $10::text, $11::text, $12::jsonb,
           $13::timestamptz, $14::timestamptz, $15::timestamptz, $16::timestamptz
    FROM claimed
"#;

pub const GET_PROPOSAL: &str = "SELECT * FROM proposals WHERE id = $1";

pub const LIST_PROPOSALS_BY_STATUS: &str = r#"
    SELECT * FROM proposals
    WHERE status = $1
    ORDER BY CASE priority
        WHEN 'critical' THEN 3 WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0
    END DESC, created_at DESC
    LIMIT $2
"#;

pub const LIST_PROPOSALS: &str = r#"
    SELECT * FROM proposals
    ORDER BY CASE priority
        WHEN 'critical' THEN 3 WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0
    END DESC, created_at DESC
"#;

/// Compare-and-set status write. Returns no row when the proposal is missing,
/// otherwise the status observed under lock and whether the write applied.
pub const CHANGE_STATUS: &str = r#"
    WITH target AS (
        SELECT id, status FROM proposals WHERE id = $1 FOR UPDATE
    ),
    updated AS (
        UPDATE proposals p
        SET previous_state = p.status,
            status = $3,
            state_change_reason = $4,
            state_change_metadata = $5,
            state_changed_at = $6,
            updated_at = $6
        FROM target t
        WHERE p.id = t.id AND t.status = $2
        RETURNING p.id
    )
    SELECT t.status, EXISTS (SELECT 1 FROM updated) AS applied
    FROM target t
"#;

pub const SET_IMPLEMENTATION_STATUS: &str = r#"
    UPDATE proposals SET implementation_status = $2, updated_at = $3 WHERE id = $1
"#;

pub const SET_TARGET_SECTION: &str = r#"
    UPDATE proposals SET target_section = $2, updated_at = $3 WHERE id = $1
"#;

/// Sets both status fields to validated unless the proposal already left the
/// build path (synced, rejected or failed).
pub const PROMOTE_VALIDATED: &str = r#"
    WITH target AS (
        SELECT id, status FROM proposals WHERE id = $1 FOR UPDATE
    ),
    updated AS (
        UPDATE proposals p
        SET previous_state = CASE WHEN p.status = 'validated' THEN p.previous_state ELSE p.status END,
            status = 'validated',
            implementation_status = 'validated',
            state_change_reason = $2,
            state_change_metadata = NULL,
            state_changed_at = $3,
            updated_at = $3
        FROM target t
        WHERE p.id = t.id AND t.status IN ('implemented', 'validated')
        RETURNING p.id
    )
    SELECT t.status, EXISTS (SELECT 1 FROM updated) AS applied
    FROM target t
"#;

// =============================================================================
// VETTINGS
// =============================================================================

pub const INSERT_VETTING: &str = r#"
    INSERT INTO vettings (id, proposal_id, assessor, operational_impact, deployment_risk, rollout_strategy, recommendation, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

pub const LIST_VETTINGS: &str = r#"
    SELECT * FROM vettings WHERE proposal_id = $1 ORDER BY created_at DESC
"#;

// =============================================================================
// IMPLEMENTATIONS
// =============================================================================

pub const INSERT_IMPLEMENTATION: &str = r#"
    INSERT INTO implementations (
        id, proposal_id, assigned_to, status, progress, notes, summary,
        validation_status, started_at, updated_at, completed_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
"#;

pub const GET_IMPLEMENTATION: &str = "SELECT * FROM implementations WHERE id = $1";

pub const ACTIVE_IMPLEMENTATION: &str = r#"
    SELECT * FROM implementations
    WHERE proposal_id = $1 AND status <> 'failed'
    ORDER BY started_at DESC
    LIMIT 1
"#;

/// NULL parameters leave the column untouched
pub const UPDATE_IMPLEMENTATION: &str = r#"
    UPDATE implementations
    SET status = COALESCE($2::text, status),
        progress = COALESCE($3::integer, progress),
        notes = COALESCE($4::text, notes),
        summary = COALESCE($5::text, summary),
        validation_status = COALESCE($6::text, validation_status),
        completed_at = COALESCE($7::timestamptz, completed_at),
        updated_at = $8
    WHERE id = $1
    RETURNING *
"#;

// =============================================================================
// VALIDATIONS
// =============================================================================

pub const INSERT_VALIDATION: &str = r#"
    INSERT INTO validations (id, implementation_id, passed, checks, failed_count, validated_at)
    VALUES ($1, $2, $3, $4, $5, $6)
"#;

pub const LIST_VALIDATIONS: &str = r#"
    SELECT * FROM validations WHERE implementation_id = $1 ORDER BY validated_at DESC
"#;

// =============================================================================
// DOCUMENT SECTIONS & SYNC LINKS
// =============================================================================

pub const GET_SECTION: &str = "SELECT * FROM document_sections WHERE title = $1";

/// The guarded publish write. Upserts the section, creates the link and flips
/// the proposal to synced, all keyed on the proposal still being validated on
/// both fields and not yet linked. Returns no row when the proposal is missing.
pub const SYNC_PROPOSAL: &str = r#"
    WITH target AS (
        SELECT id, status, implementation_status FROM proposals WHERE id = $1 FOR UPDATE
    ),
    eligible AS (
        SELECT t.id FROM target t
        WHERE t.status = 'validated'
          AND t.implementation_status = 'validated'
          AND NOT EXISTS (SELECT 1 FROM sync_links l WHERE l.proposal_id = t.id)
    ),
    section AS (
        INSERT INTO document_sections (title, slug, content, sort_order, checksum, last_updated)
        SELECT $2::text, $3::text, '',
               COALESCE((SELECT MAX(sort_order) FROM document_sections), 0) + 1,
               $4::text, $5::timestamptz
        FROM eligible
        ON CONFLICT (title) DO UPDATE SET last_updated = EXCLUDED.last_updated
        RETURNING title
    ),
    link AS (
        INSERT INTO sync_links (proposal_id, section_title, linked_at)
        SELECT e.id, $2::text, $5::timestamptz FROM eligible e
        ON CONFLICT (proposal_id) DO NOTHING
        RETURNING proposal_id
    ),
    flipped AS (
        UPDATE proposals p
        SET previous_state = p.status,
            status = 'synced',
            state_change_reason = $6::text,
            state_change_metadata = NULL,
            state_changed_at = $5::timestamptz,
            synced_at = $5::timestamptz,
            updated_at = $5::timestamptz
        FROM link l
        WHERE p.id = l.proposal_id
        RETURNING p.id
    )
    SELECT t.status, t.implementation_status,
           EXISTS (SELECT 1 FROM flipped) AS linked
    FROM target t
"#;

pub const GET_SYNC_LINK: &str = "SELECT * FROM sync_links WHERE proposal_id = $1";

pub const LIST_SYNC_LINKS: &str = "SELECT * FROM sync_links ORDER BY linked_at DESC";

pub const LIST_READY_TO_SYNC: &str = r#"
    SELECT p.* FROM proposals p
    LEFT JOIN sync_links l ON l.proposal_id = p.id
    WHERE p.status = 'validated' AND l.proposal_id IS NULL
    ORDER BY COALESCE(p.state_changed_at, p.created_at) DESC
"#;
