//! SQLite implementation of `WorkflowRepository`.
//!
//! # Schema Versioning
//!
//! The `schema_version` table holds a single row with the schema version.
//! To change the schema, increment `CURRENT_SCHEMA_VERSION` and add a step to
//! `run_migrations()`. Steps run in order from the stored version.
//!
//! # Atomicity
//!
//! [`WorkflowRepository::commit`] runs in one SQLite transaction: the version
//! check, the item update, the transition insert, the artifact insert and the
//! clarification write either all land or none do. `status_transitions` is
//! append-only; triggers reject updates and deletes.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{info, warn};

use super::{ClarificationWrite, CommitOutcome, ItemCommit, RepositoryError, WorkflowRepository};
use taskpilot_core::{
    Actor, AgentStage, Artifact, ArtifactBody, ArtifactId, Clarification, ClarificationId,
    ClarificationState, OperationKind, ReviewStatus, StatusTransition, TransitionId, WorkItem,
    WorkItemId, WorkItemKind, WorkItemStatus,
};

/// Current schema version. Increment this when making schema changes and add
/// the corresponding step in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// SQLite-backed workflow repository.
///
/// rusqlite is synchronous, so every call runs on `spawn_blocking` behind a
/// mutex-guarded connection.
pub struct SqliteRepository {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage("lock connection", "connection mutex poisoned"))
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// The database runs with `journal_mode = WAL`, `synchronous = FULL` and a
    /// 5 second busy timeout. On Unix the state directory is restricted to
    /// 0700 and the database files to 0600.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // SQLite can silently stay in DELETE mode on filesystems without
        // shared memory support, so check what it actually picked.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned journal mode '{}' instead of 'wal'; \
                     the state directory must be on a filesystem that supports shared memory",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            for suffix in ["", "-wal", "-shm"] {
                let file = format!("{}{}", path_str, suffix);
                if Path::new(&file).exists() {
                    let permissions = std::fs::Permissions::from_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&file, permissions) {
                        warn!("Failed to set restrictive permissions on {}: {}", file, e);
                    }
                }
            }
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade taskpilot.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS work_items (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    issue_number INTEGER,
                    project_item_id TEXT,
                    status TEXT NOT NULL,
                    review_status TEXT,
                    feedback TEXT,
                    pr_number INTEGER,
                    commit_message TEXT,
                    merge_commit_sha TEXT,
                    revert_pr_number INTEGER,
                    mirrored_status TEXT,
                    version INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS status_transitions (
                    id TEXT PRIMARY KEY,
                    item_id TEXT NOT NULL REFERENCES work_items(id),
                    sequence INTEGER NOT NULL,
                    from_status TEXT NOT NULL,
                    to_status TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    actor TEXT NOT NULL,
                    reason TEXT,
                    compensates TEXT,
                    recorded_at TEXT NOT NULL,
                    UNIQUE (item_id, sequence)
                );

                CREATE TABLE IF NOT EXISTS artifacts (
                    id TEXT PRIMARY KEY,
                    item_id TEXT NOT NULL REFERENCES work_items(id),
                    stage TEXT NOT NULL,
                    agent TEXT NOT NULL,
                    body_json TEXT NOT NULL,
                    supersedes TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_artifacts_item
                    ON artifacts(item_id, created_at);

                CREATE TABLE IF NOT EXISTS clarifications (
                    id TEXT PRIMARY KEY,
                    item_id TEXT NOT NULL REFERENCES work_items(id),
                    agent TEXT NOT NULL,
                    question TEXT NOT NULL,
                    context TEXT NOT NULL,
                    options_json TEXT NOT NULL,
                    token_hash TEXT NOT NULL,
                    state_json TEXT NOT NULL,
                    is_pending INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_clarifications_item
                    ON clarifications(item_id, created_at);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // v2: the transition log is append-only, and the expiry sweep needs
        // a cheap way to find pending clarifications.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TRIGGER IF NOT EXISTS status_transitions_no_update
                    BEFORE UPDATE ON status_transitions
                BEGIN
                    SELECT RAISE(ABORT, 'status_transitions is append-only');
                END;

                CREATE TRIGGER IF NOT EXISTS status_transitions_no_delete
                    BEFORE DELETE ON status_transitions
                BEGIN
                    SELECT RAISE(ABORT, 'status_transitions is append-only');
                END;

                CREATE INDEX IF NOT EXISTS idx_clarifications_pending
                    ON clarifications(is_pending) WHERE is_pending = 1;
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        info!(
            "Migrated workflow database from schema v{} to v{}",
            from_version, CURRENT_SCHEMA_VERSION
        );

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

// =============================================================================
// Column conversion helpers
// =============================================================================

fn u64_to_i64(value: u64, operation: &'static str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!("value {} exceeds maximum storable value ({})", value, i64::MAX),
        )
    })
}

fn opt_u64_to_i64(
    value: Option<u64>,
    operation: &'static str,
) -> Result<Option<i64>, RepositoryError> {
    value.map(|v| u64_to_i64(v, operation)).transpose()
}

fn i64_to_u64(value: i64, what: &str) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::corruption(format!("negative {} {}", what, value)))
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::corruption(format!("{} timestamp '{}'", what, value)))
}

fn parse_column<T: FromStr>(value: &str, what: &str) -> Result<T, RepositoryError> {
    value
        .parse()
        .map_err(|_| RepositoryError::corruption(format!("{} '{}'", what, value)))
}

fn storage_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> RepositoryError {
    move |e| RepositoryError::storage(operation, e.to_string())
}

// =============================================================================
// Row mapping
// =============================================================================

const ITEM_COLUMNS: &str = "id, kind, title, description, issue_number, project_item_id, status,
     review_status, feedback, pr_number, commit_message, merge_commit_sha, revert_pr_number,
     mirrored_status, version, created_at, updated_at";

/// A `work_items` row before its text columns are parsed.
struct ItemRow {
    id: String,
    kind: String,
    title: String,
    description: String,
    issue_number: Option<i64>,
    project_item_id: Option<String>,
    status: String,
    review_status: Option<String>,
    feedback: Option<String>,
    pr_number: Option<i64>,
    commit_message: Option<String>,
    merge_commit_sha: Option<String>,
    revert_pr_number: Option<i64>,
    mirrored_status: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            issue_number: row.get(4)?,
            project_item_id: row.get(5)?,
            status: row.get(6)?,
            review_status: row.get(7)?,
            feedback: row.get(8)?,
            pr_number: row.get(9)?,
            commit_message: row.get(10)?,
            merge_commit_sha: row.get(11)?,
            revert_pr_number: row.get(12)?,
            mirrored_status: row.get(13)?,
            version: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_item(self) -> Result<WorkItem, RepositoryError> {
        Ok(WorkItem {
            kind: parse_column::<WorkItemKind>(&self.kind, "work item kind")?,
            status: parse_column::<WorkItemStatus>(&self.status, "status")?,
            review_status: self
                .review_status
                .as_deref()
                .map(|s| parse_column::<ReviewStatus>(s, "review status"))
                .transpose()?,
            mirrored_status: self
                .mirrored_status
                .as_deref()
                .map(|s| parse_column::<WorkItemStatus>(s, "mirrored status"))
                .transpose()?,
            issue_number: self
                .issue_number
                .map(|n| i64_to_u64(n, "issue number"))
                .transpose()?,
            pr_number: self
                .pr_number
                .map(|n| i64_to_u64(n, "PR number"))
                .transpose()?,
            revert_pr_number: self
                .revert_pr_number
                .map(|n| i64_to_u64(n, "revert PR number"))
                .transpose()?,
            version: i64_to_u64(self.version, "version")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
            id: WorkItemId(self.id),
            title: self.title,
            description: self.description,
            project_item_id: self.project_item_id,
            feedback: self.feedback,
            commit_message: self.commit_message,
            merge_commit_sha: self.merge_commit_sha,
        })
    }
}

const TRANSITION_COLUMNS: &str = "id, item_id, sequence, from_status, to_status, operation,
     actor, reason, compensates, recorded_at";

struct TransitionRow {
    id: String,
    item_id: String,
    sequence: i64,
    from: String,
    to: String,
    operation: String,
    actor: String,
    reason: Option<String>,
    compensates: Option<String>,
    recorded_at: String,
}

impl TransitionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            item_id: row.get(1)?,
            sequence: row.get(2)?,
            from: row.get(3)?,
            to: row.get(4)?,
            operation: row.get(5)?,
            actor: row.get(6)?,
            reason: row.get(7)?,
            compensates: row.get(8)?,
            recorded_at: row.get(9)?,
        })
    }

    fn into_transition(self) -> Result<StatusTransition, RepositoryError> {
        Ok(StatusTransition {
            sequence: i64_to_u64(self.sequence, "transition sequence")?,
            from: parse_column(&self.from, "transition from status")?,
            to: parse_column(&self.to, "transition to status")?,
            operation: parse_column::<OperationKind>(&self.operation, "operation")?,
            actor: parse_column::<Actor>(&self.actor, "actor")?,
            recorded_at: parse_timestamp(&self.recorded_at, "recorded_at")?,
            id: TransitionId(self.id),
            item_id: WorkItemId(self.item_id),
            reason: self.reason,
            compensates: self.compensates.map(TransitionId),
        })
    }
}

const ARTIFACT_COLUMNS: &str = "id, item_id, stage, agent, body_json, supersedes, created_at";

type ArtifactRow = (String, String, String, String, String, Option<String>, String);

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<ArtifactRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_artifact(row: ArtifactRow) -> Result<Artifact, RepositoryError> {
    let (id, item_id, stage, agent, body_json, supersedes, created_at) = row;
    let body: ArtifactBody = serde_json::from_str(&body_json)
        .map_err(|_| RepositoryError::corruption(format!("artifact {} body JSON", id)))?;
    Ok(Artifact {
        stage: parse_column(&stage, "artifact stage")?,
        agent: parse_column::<AgentStage>(&agent, "artifact agent")?,
        created_at: parse_timestamp(&created_at, "artifact created_at")?,
        id: ArtifactId(id),
        item_id: WorkItemId(item_id),
        body,
        supersedes: supersedes.map(ArtifactId),
    })
}

const CLARIFICATION_COLUMNS: &str = "id, item_id, agent, question, context, options_json,
     token_hash, state_json, created_at, expires_at";

type ClarificationRow = [String; 10];

fn clarification_from_row(row: &Row<'_>) -> rusqlite::Result<ClarificationRow> {
    Ok([
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ])
}

fn into_clarification(row: ClarificationRow) -> Result<Clarification, RepositoryError> {
    let [id, item_id, agent, question, context, options_json, token_hash, state_json, created_at, expires_at] =
        row;
    let options: Vec<String> = serde_json::from_str(&options_json)
        .map_err(|_| RepositoryError::corruption(format!("clarification {} options", id)))?;
    let state: ClarificationState = serde_json::from_str(&state_json)
        .map_err(|_| RepositoryError::corruption(format!("clarification {} state", id)))?;
    Ok(Clarification {
        agent: parse_column::<AgentStage>(&agent, "clarification agent")?,
        created_at: parse_timestamp(&created_at, "clarification created_at")?,
        expires_at: parse_timestamp(&expires_at, "clarification expires_at")?,
        id: ClarificationId(id),
        item_id: WorkItemId(item_id),
        question,
        context,
        options,
        token_hash,
        state,
    })
}

/// Run a query and convert every row, failing on the first corrupt one.
fn query_all<R, T>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: impl rusqlite::Params,
    map_row: impl FnMut(&Row<'_>) -> rusqlite::Result<R>,
    convert: impl Fn(R) -> Result<T, RepositoryError>,
) -> Result<Vec<T>, RepositoryError> {
    let mut stmt = conn.prepare(sql).map_err(storage_err(operation))?;
    let rows = stmt
        .query_map(params, map_row)
        .map_err(storage_err(operation))?;
    let mut results = Vec::new();
    for row in rows {
        results.push(convert(row.map_err(storage_err(operation))?)?);
    }
    Ok(results)
}

// =============================================================================
// Commit
// =============================================================================

fn insert_item_row(conn: &Connection, item: &WorkItem) -> Result<(), RepositoryError> {
    conn.execute(
        &format!(
            "INSERT INTO work_items ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            ITEM_COLUMNS
        ),
        params![
            item.id.as_str(),
            item.kind.as_str(),
            item.title,
            item.description,
            opt_u64_to_i64(item.issue_number, "insert_item")?,
            item.project_item_id,
            item.status.as_str(),
            item.review_status.map(|s| s.as_str()),
            item.feedback,
            opt_u64_to_i64(item.pr_number, "insert_item")?,
            item.commit_message,
            item.merge_commit_sha,
            opt_u64_to_i64(item.revert_pr_number, "insert_item")?,
            item.mirrored_status.map(|s| s.as_str()),
            u64_to_i64(item.version, "insert_item")?,
            timestamp(&item.created_at),
            timestamp(&item.updated_at),
        ],
    )
    .map_err(storage_err("insert_item"))?;
    Ok(())
}

/// Body of `commit`, run inside `tx`. Returning early drops `tx`, which rolls
/// back.
fn commit_in_tx(tx: &Transaction<'_>, commit: &ItemCommit) -> Result<CommitOutcome, RepositoryError> {
    let item = &commit.item;
    let expected_version = u64_to_i64(commit.expected_version, "commit")?;

    let stored: Option<(i64, String)> = tx
        .query_row(
            "SELECT version, status FROM work_items WHERE id = ?1",
            params![item.id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(storage_err("commit"))?;
    let (stored_version, stored_status) = stored
        .ok_or_else(|| RepositoryError::storage("commit", format!("no item {}", item.id)))?;
    if stored_version != expected_version {
        return Ok(CommitOutcome::Conflict);
    }
    let stored_status: WorkItemStatus = parse_column(&stored_status, "status")?;

    if let Some(artifact) = &commit.artifact {
        if artifact.stage != stored_status {
            return Err(RepositoryError::Invariant(format!(
                "artifact for stage {} written while item {} is in {}",
                artifact.stage, item.id, stored_status
            )));
        }
    }

    if let Some(transition) = &commit.transition {
        let last_sequence: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM status_transitions WHERE item_id = ?1",
                params![item.id.as_str()],
                |row| row.get(0),
            )
            .map_err(storage_err("commit"))?;
        if u64_to_i64(transition.sequence, "commit")? != last_sequence + 1 {
            return Err(RepositoryError::Invariant(format!(
                "transition sequence {} does not follow {} for item {}",
                transition.sequence, last_sequence, item.id
            )));
        }
    }

    if let Some(ClarificationWrite::Resolve(clarification)) = &commit.clarification {
        let still_pending: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM clarifications
                 WHERE id = ?1 AND item_id = ?2 AND is_pending = 1)",
                params![clarification.id.as_str(), item.id.as_str()],
                |row| row.get(0),
            )
            .map_err(storage_err("commit"))?;
        if !still_pending {
            return Ok(CommitOutcome::Conflict);
        }
    }

    // mirrored_status is owned by record_mirror and left untouched here.
    let updated = tx
        .execute(
            "UPDATE work_items SET
                 kind = ?1, title = ?2, description = ?3, issue_number = ?4,
                 project_item_id = ?5, status = ?6, review_status = ?7, feedback = ?8,
                 pr_number = ?9, commit_message = ?10, merge_commit_sha = ?11,
                 revert_pr_number = ?12, version = ?13, updated_at = ?14
             WHERE id = ?15 AND version = ?16",
            params![
                item.kind.as_str(),
                item.title,
                item.description,
                opt_u64_to_i64(item.issue_number, "commit")?,
                item.project_item_id,
                item.status.as_str(),
                item.review_status.map(|s| s.as_str()),
                item.feedback,
                opt_u64_to_i64(item.pr_number, "commit")?,
                item.commit_message,
                item.merge_commit_sha,
                opt_u64_to_i64(item.revert_pr_number, "commit")?,
                u64_to_i64(item.version, "commit")?,
                timestamp(&item.updated_at),
                item.id.as_str(),
                expected_version,
            ],
        )
        .map_err(storage_err("commit"))?;
    if updated != 1 {
        return Ok(CommitOutcome::Conflict);
    }

    if let Some(transition) = &commit.transition {
        tx.execute(
            &format!(
                "INSERT INTO status_transitions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                TRANSITION_COLUMNS
            ),
            params![
                transition.id.as_str(),
                transition.item_id.as_str(),
                u64_to_i64(transition.sequence, "commit")?,
                transition.from.as_str(),
                transition.to.as_str(),
                transition.operation.as_str(),
                transition.actor.as_str(),
                transition.reason,
                transition.compensates.as_ref().map(|c| c.as_str()),
                timestamp(&transition.recorded_at),
            ],
        )
        .map_err(storage_err("commit transition"))?;
    }

    if let Some(artifact) = &commit.artifact {
        let body_json = serde_json::to_string(&artifact.body)
            .map_err(|e| RepositoryError::storage("serialize artifact", e.to_string()))?;
        tx.execute(
            &format!(
                "INSERT INTO artifacts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                ARTIFACT_COLUMNS
            ),
            params![
                artifact.id.as_str(),
                artifact.item_id.as_str(),
                artifact.stage.as_str(),
                artifact.agent.as_str(),
                body_json,
                artifact.supersedes.as_ref().map(|s| s.as_str()),
                timestamp(&artifact.created_at),
            ],
        )
        .map_err(storage_err("commit artifact"))?;
    }

    match &commit.clarification {
        Some(ClarificationWrite::Insert(clarification)) => {
            let options_json = serde_json::to_string(&clarification.options)
                .map_err(|e| RepositoryError::storage("serialize clarification", e.to_string()))?;
            let state_json = serde_json::to_string(&clarification.state)
                .map_err(|e| RepositoryError::storage("serialize clarification", e.to_string()))?;
            tx.execute(
                &format!(
                    "INSERT INTO clarifications ({}, is_pending)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    CLARIFICATION_COLUMNS
                ),
                params![
                    clarification.id.as_str(),
                    clarification.item_id.as_str(),
                    clarification.agent.as_str(),
                    clarification.question,
                    clarification.context,
                    options_json,
                    clarification.token_hash,
                    state_json,
                    timestamp(&clarification.created_at),
                    timestamp(&clarification.expires_at),
                    clarification.is_pending(),
                ],
            )
            .map_err(storage_err("commit clarification"))?;
        }
        Some(ClarificationWrite::Resolve(clarification)) => {
            let state_json = serde_json::to_string(&clarification.state)
                .map_err(|e| RepositoryError::storage("serialize clarification", e.to_string()))?;
            let updated = tx
                .execute(
                    "UPDATE clarifications SET state_json = ?1, is_pending = ?2
                     WHERE id = ?3 AND is_pending = 1",
                    params![
                        state_json,
                        clarification.is_pending(),
                        clarification.id.as_str()
                    ],
                )
                .map_err(storage_err("commit clarification"))?;
            if updated != 1 {
                return Ok(CommitOutcome::Conflict);
            }
        }
        None => {}
    }

    Ok(CommitOutcome::Committed)
}

// =============================================================================
// WorkflowRepository trait implementation
// =============================================================================

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn insert_item(&self, item: &WorkItem) -> Result<(), RepositoryError> {
        let item = item.clone();
        self.with_conn("insert_item", move |conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM work_items WHERE id = ?1)",
                    params![item.id.as_str()],
                    |row| row.get(0),
                )
                .map_err(storage_err("insert_item"))?;
            if exists {
                return Err(RepositoryError::Duplicate(item.id.clone()));
            }
            insert_item_row(conn, &item)
        })
        .await
    }

    async fn get_item(&self, id: &WorkItemId) -> Result<Option<WorkItem>, RepositoryError> {
        let id = id.clone();
        self.with_conn("get_item", move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM work_items WHERE id = ?1", ITEM_COLUMNS),
                    params![id.as_str()],
                    ItemRow::from_row,
                )
                .optional()
                .map_err(storage_err("get_item"))?;
            row.map(ItemRow::into_item).transpose()
        })
        .await
    }

    async fn list_items(&self) -> Result<Vec<WorkItem>, RepositoryError> {
        self.with_conn("list_items", |conn| {
            query_all(
                conn,
                "list_items",
                &format!(
                    "SELECT {} FROM work_items ORDER BY created_at, rowid",
                    ITEM_COLUMNS
                ),
                [],
                ItemRow::from_row,
                ItemRow::into_item,
            )
        })
        .await
    }

    async fn commit(&self, commit: ItemCommit) -> Result<CommitOutcome, RepositoryError> {
        commit.validate()?;
        self.with_conn("commit", move |conn| {
            let tx = conn.transaction().map_err(storage_err("begin commit"))?;
            let outcome = commit_in_tx(&tx, &commit)?;
            if outcome == CommitOutcome::Committed {
                tx.commit().map_err(storage_err("commit"))?;
            }
            Ok(outcome)
        })
        .await
    }

    async fn record_mirror(
        &self,
        id: &WorkItemId,
        status: WorkItemStatus,
    ) -> Result<bool, RepositoryError> {
        let id = id.clone();
        self.with_conn("record_mirror", move |conn| {
            let updated = conn
                .execute(
                    "UPDATE work_items SET mirrored_status = ?1 WHERE id = ?2 AND status = ?1",
                    params![status.as_str(), id.as_str()],
                )
                .map_err(storage_err("record_mirror"))?;
            if updated > 0 {
                return Ok(true);
            }
            let exists = conn
                .query_row(
                    "SELECT 1 FROM work_items WHERE id = ?1",
                    params![id.as_str()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(storage_err("record_mirror"))?
                .is_some();
            if !exists {
                return Err(RepositoryError::storage("record_mirror", format!("no item {}", id)));
            }
            Ok(false)
        })
        .await
    }

    async fn transitions(
        &self,
        id: &WorkItemId,
    ) -> Result<Vec<StatusTransition>, RepositoryError> {
        let id = id.clone();
        self.with_conn("transitions", move |conn| {
            query_all(
                conn,
                "transitions",
                &format!(
                    "SELECT {} FROM status_transitions WHERE item_id = ?1 ORDER BY sequence",
                    TRANSITION_COLUMNS
                ),
                params![id.as_str()],
                TransitionRow::from_row,
                TransitionRow::into_transition,
            )
        })
        .await
    }

    async fn artifacts(&self, id: &WorkItemId) -> Result<Vec<Artifact>, RepositoryError> {
        let id = id.clone();
        self.with_conn("artifacts", move |conn| {
            query_all(
                conn,
                "artifacts",
                &format!(
                    "SELECT {} FROM artifacts WHERE item_id = ?1 ORDER BY created_at, rowid",
                    ARTIFACT_COLUMNS
                ),
                params![id.as_str()],
                artifact_from_row,
                into_artifact,
            )
        })
        .await
    }

    async fn clarifications(
        &self,
        id: &WorkItemId,
    ) -> Result<Vec<Clarification>, RepositoryError> {
        let id = id.clone();
        self.with_conn("clarifications", move |conn| {
            query_all(
                conn,
                "clarifications",
                &format!(
                    "SELECT {} FROM clarifications WHERE item_id = ?1 ORDER BY created_at, rowid",
                    CLARIFICATION_COLUMNS
                ),
                params![id.as_str()],
                clarification_from_row,
                into_clarification,
            )
        })
        .await
    }

    async fn get_clarification(
        &self,
        id: &ClarificationId,
    ) -> Result<Option<Clarification>, RepositoryError> {
        let id = id.clone();
        self.with_conn("get_clarification", move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM clarifications WHERE id = ?1",
                        CLARIFICATION_COLUMNS
                    ),
                    params![id.as_str()],
                    clarification_from_row,
                )
                .optional()
                .map_err(storage_err("get_clarification"))?;
            row.map(into_clarification).transpose()
        })
        .await
    }

    async fn pending_clarifications(&self) -> Result<Vec<Clarification>, RepositoryError> {
        self.with_conn("pending_clarifications", |conn| {
            query_all(
                conn,
                "pending_clarifications",
                &format!(
                    "SELECT {} FROM clarifications WHERE is_pending = 1 ORDER BY created_at, rowid",
                    CLARIFICATION_COLUMNS
                ),
                [],
                clarification_from_row,
                into_clarification,
            )
        })
        .await
    }

    async fn latest_transition(
        &self,
        id: &WorkItemId,
    ) -> Result<Option<StatusTransition>, RepositoryError> {
        let id = id.clone();
        self.with_conn("latest_transition", move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM status_transitions WHERE item_id = ?1
                         ORDER BY sequence DESC LIMIT 1",
                        TRANSITION_COLUMNS
                    ),
                    params![id.as_str()],
                    TransitionRow::from_row,
                )
                .optional()
                .map_err(storage_err("latest_transition"))?;
            row.map(TransitionRow::into_transition).transpose()
        })
        .await
    }
}
