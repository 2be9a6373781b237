use crate::{Commit, ReviewState};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

/// File name of the database inside the code folder.
pub const DB_FILE_NAME: &str = "review-deck.db";

/// Migration batches. Batch `i` brings the schema from version `i` to `i + 1`.
const MIGRATIONS: &[&[&str]] = &[
    &[
        "CREATE TABLE IF NOT EXISTS fetch_states (project TEXT NOT NULL, since INTEGER)",
        "CREATE UNIQUE INDEX IF NOT EXISTS index_fetch_states ON fetch_states (project)",
        "CREATE TABLE IF NOT EXISTS commits (
            project TEXT NOT NULL,
            hash TEXT NOT NULL,
            message TEXT NOT NULL,
            author_name TEXT NOT NULL,
            committer_name TEXT NOT NULL,
            commit_when INTEGER,
            slat_score INTEGER,
            state TEXT NOT NULL,
            comment TEXT
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS index_commits ON commits (project, hash)",
    ],
    &["ALTER TABLE commits ADD COLUMN body TEXT NOT NULL DEFAULT ''"],
];

/// A migration batch failed. The recorded version is left at `version - 1`.
#[derive(Debug, Error)]
#[error("migration to schema version {version} failed: {source}")]
pub struct SchemaError {
    pub version: usize,
    #[source]
    pub source: rusqlite::Error,
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid review state: {0}")]
    InvalidState(String),
    #[error("database connection poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Restricts which commits `load_commits` returns.
#[derive(Debug, Clone, Default)]
pub struct CommitFilter {
    pub project: Option<String>,
    pub state: Option<ReviewState>,
}

impl CommitFilter {
    /// Unreviewed commits of every project, as needed to rebuild the view.
    pub fn unreviewed() -> Self {
        Self {
            project: None,
            state: Some(ReviewState::New),
        }
    }
}

/// SQLite-backed store for fetch cursors and commits.
///
/// The connection sits behind a mutex, so one `Store` can be shared between
/// ingestion workers and the presentation loop. All writes are serialized.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the store at the given path and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open a store that lives only in memory.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        initialize(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<usize> {
        let conn = self.conn()?;
        Ok(read_version(&conn)?)
    }

    /// Get the fetch cursor of a project. `None` means it was never synchronized.
    pub fn get_fetch_state(&self, project: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let since: Option<Option<i64>> = conn
            .query_row(
                "SELECT since FROM fetch_states WHERE project = ?1",
                params![project],
                |row| row.get(0),
            )
            .optional()?;

        Ok(since.flatten().and_then(from_millis))
    }

    /// Upsert the fetch cursor of a project. Last writer wins, so callers pass
    /// the maximum observed commit time.
    pub fn set_fetch_state(&self, project: &str, since: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO fetch_states (project, since) VALUES (?1, ?2)
             ON CONFLICT(project) DO UPDATE SET since = ?2",
            params![project, since.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Insert commits, ignoring any whose `(project, hash)` is already stored.
    ///
    /// The batch runs in one transaction. Returns the number of new rows.
    pub fn store_commits(&self, commits: &[Commit]) -> Result<usize> {
        Ok(self.store_batch(commits)?.inserted)
    }

    /// Like `store_commits`, but also reads back every commit of the batch
    /// that is still unreviewed, with its stored fields.
    ///
    /// Commits stored by an earlier, partially failed run are included, so a
    /// re-derived window still reaches the view.
    pub fn store_batch(&self, commits: &[Commit]) -> Result<StoredBatch> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut batch = StoredBatch::default();
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO commits
                 (project, hash, message, body, author_name, committer_name,
                  commit_when, slat_score, state, comment)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut select = tx.prepare(&format!(
                "{} WHERE project = ?1 AND hash = ?2 AND state = ?3",
                SELECT_COMMITS
            ))?;
            for commit in commits {
                let changed = insert.execute(params![
                    commit.project,
                    commit.hash,
                    commit.subject,
                    commit.body,
                    commit.author_name,
                    commit.committer_name,
                    commit.commit_time.timestamp_millis(),
                    commit.slat_score,
                    commit.state.as_str(),
                    commit.comment,
                ])?;
                if changed > 0 {
                    batch.inserted += 1;
                }
                let row = select
                    .query_row(
                        params![commit.project, commit.hash, ReviewState::New.as_str()],
                        StoredRow::from_row,
                    )
                    .optional()?;
                if let Some(row) = row {
                    batch.unreviewed.push(row.into_commit()?);
                }
            }
        }
        tx.commit()?;
        debug!(
            offered = commits.len(),
            inserted = batch.inserted,
            "stored commits"
        );
        Ok(batch)
    }

    /// Mark one commit reviewed. Review is one-way: nothing sets a commit
    /// back to `New`.
    ///
    /// Returns whether the commit exists. Repeating the call is a no-op.
    pub fn mark_reviewed(&self, project: &str, hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE commits SET state = ?1 WHERE project = ?2 AND hash = ?3",
            params![ReviewState::Reviewed.as_str(), project, hash],
        )?;
        Ok(count > 0)
    }

    /// Attach a free-text comment to one commit. Absent rows are ignored.
    pub fn set_comment(&self, project: &str, hash: &str, comment: Option<&str>) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE commits SET comment = ?1 WHERE project = ?2 AND hash = ?3",
            params![comment, project, hash],
        )?;
        Ok(count > 0)
    }

    /// Load commits matching the filter, oldest first.
    pub fn load_commits(&self, filter: &CommitFilter) -> Result<Vec<Commit>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE (?1 IS NULL OR project = ?1) AND (?2 IS NULL OR state = ?2)
             ORDER BY commit_when, hash",
            SELECT_COMMITS
        ))?;

        let rows = stmt.query_map(
            params![filter.project, filter.state.map(ReviewState::as_str)],
            StoredRow::from_row,
        )?;

        let mut commits = Vec::new();
        for row in rows {
            commits.push(row?.into_commit()?);
        }
        Ok(commits)
    }

    /// Count commits matching the filter.
    pub fn count_commits(&self, filter: &CommitFilter) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM commits
             WHERE (?1 IS NULL OR project = ?1) AND (?2 IS NULL OR state = ?2)",
            params![filter.project, filter.state.map(ReviewState::as_str)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Commits written by one `store_batch` call.
#[derive(Debug, Default)]
pub struct StoredBatch {
    /// Rows that did not exist before.
    pub inserted: usize,
    /// Commits of the batch whose stored state is `New`, in batch order.
    pub unreviewed: Vec<Commit>,
}

const SELECT_COMMITS: &str = "SELECT project, hash, message, body, author_name, committer_name,
            commit_when, slat_score, state, comment
     FROM commits";

struct StoredRow {
    project: String,
    hash: String,
    subject: String,
    body: String,
    author_name: String,
    committer_name: String,
    commit_when: Option<i64>,
    slat_score: Option<i64>,
    state: String,
    comment: Option<String>,
}

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredRow {
            project: row.get(0)?,
            hash: row.get(1)?,
            subject: row.get(2)?,
            body: row.get(3)?,
            author_name: row.get(4)?,
            committer_name: row.get(5)?,
            commit_when: row.get(6)?,
            slat_score: row.get(7)?,
            state: row.get(8)?,
            comment: row.get(9)?,
        })
    }

    fn into_commit(self) -> Result<Commit> {
        let state = self
            .state
            .parse::<ReviewState>()
            .map_err(StoreError::InvalidState)?;
        Ok(Commit {
            project: self.project,
            hash: self.hash,
            author_name: self.author_name,
            committer_name: self.committer_name,
            commit_time: self
                .commit_when
                .and_then(from_millis)
                .unwrap_or_default(),
            subject: self.subject,
            body: self.body,
            state,
            comment: self.comment,
            slat_score: self.slat_score.unwrap_or(0).clamp(0, 100) as u8,
        })
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Create or upgrade the schema to the latest version.
fn initialize(conn: &mut Connection) -> Result<()> {
    migrate(conn, MIGRATIONS)
}

/// Apply every batch above the recorded version, one transaction per batch.
fn migrate(conn: &mut Connection, batches: &[&[&str]]) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (version INTEGER NOT NULL)",
        [],
    )?;
    let has_row: Option<i64> = conn
        .query_row("SELECT version FROM migrations", [], |row| row.get(0))
        .optional()?;
    if has_row.is_none() {
        conn.execute("INSERT INTO migrations (version) VALUES (0)", [])?;
    }

    let current = read_version(conn)?;
    for (index, batch) in batches.iter().enumerate().skip(current) {
        let version = index + 1;
        let schema_error = |source| SchemaError { version, source };
        let tx = conn.transaction().map_err(schema_error)?;
        for statement in batch.iter() {
            tx.execute(statement, []).map_err(schema_error)?;
        }
        tx.execute("UPDATE migrations SET version = ?1", params![version as i64])
            .map_err(schema_error)?;
        tx.commit().map_err(schema_error)?;
        info!(version, "applied schema migration");
    }
    Ok(())
}

fn read_version(conn: &Connection) -> rusqlite::Result<usize> {
    let version: i64 = conn.query_row("SELECT version FROM migrations", [], |row| row.get(0))?;
    Ok(version.max(0) as usize)
}
