//! SQLite storage layer -- schema, queries, migrations.

pub mod schema;

use crate::probes::{ProbeResult, TestDefinition};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// In-memory database. Every SQLite `:memory:` connection is its own
/// database, so the pool is capped at one connection.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory();
    let pool = R2D2Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("malformed stored record: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("test {0} not found")]
    NotFound(String),
}

/// Persistence contract used by the scheduler, ingestion and the API.
///
/// Implementations must be safe to call concurrently from many firings.
pub trait Store: Send + Sync {
    fn all_tests(&self) -> Result<Vec<TestDefinition>, StoreError>;

    fn get_test(&self, id: &str) -> Result<Option<TestDefinition>, StoreError>;

    fn get_test_by_name(&self, name: &str) -> Result<Option<TestDefinition>, StoreError>;

    /// Insert or replace a definition. Ids and names are both unique: a
    /// stored test with the same id is updated in place (renames included),
    /// and a different test holding the same name is replaced along with
    /// its results.
    fn put_test(&self, test: &TestDefinition) -> Result<(), StoreError>;

    /// Remove a test and every result recorded for it.
    fn delete_test(&self, id: &str) -> Result<(), StoreError>;

    fn save_result(&self, result: &ProbeResult) -> Result<(), StoreError>;

    /// Most recent results first.
    fn results_for(&self, test_id: &str, limit: usize) -> Result<Vec<ProbeResult>, StoreError>;
}

/// [`Store`] over a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl Store for SqliteStore {
    fn all_tests(&self) -> Result<Vec<TestDefinition>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT definition_json FROM tests ORDER BY created_at, name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tests = Vec::new();
        for r in rows {
            tests.push(serde_json::from_str(&r?)?);
        }
        Ok(tests)
    }

    fn get_test(&self, id: &str) -> Result<Option<TestDefinition>, StoreError> {
        let conn = self.pool.get()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT definition_json FROM tests WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    fn get_test_by_name(&self, name: &str) -> Result<Option<TestDefinition>, StoreError> {
        let conn = self.pool.get()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT definition_json FROM tests WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    fn put_test(&self, test: &TestDefinition) -> Result<(), StoreError> {
        let json = serde_json::to_string(test)?;
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let displaced: Option<String> = tx
            .query_row(
                "SELECT id FROM tests WHERE name = ?1 AND id <> ?2",
                params![test.name, test.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(old_id) = displaced {
            tracing::info!(test = %test.name, old_id = %old_id, new_id = %test.id, "Replacing test with a new id");
            tx.execute("DELETE FROM results WHERE test_id = ?1", params![old_id])?;
            tx.execute("DELETE FROM tests WHERE id = ?1", params![old_id])?;
        }

        tx.execute(
            "INSERT INTO tests (id, name, definition_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, definition_json = excluded.definition_json",
            params![test.id, test.name, json],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete_test(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let changed = tx.execute("DELETE FROM tests WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tx.execute("DELETE FROM results WHERE test_id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn save_result(&self, result: &ProbeResult) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO results (test_id, status, error, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.test_id,
                result.status,
                result.error,
                result.duration_ms as i64,
                result.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    }

    fn results_for(&self, test_id: &str, limit: usize) -> Result<Vec<ProbeResult>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT test_id, status, error, duration_ms, created_at FROM results
             WHERE test_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![test_id, limit as i64], |row| {
            let created_at: String = row.get(4)?;
            let timestamp = DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
                })?;
            Ok(ProbeResult {
                test_id: row.get(0)?,
                status: row.get(1)?,
                error: row.get(2)?,
                duration_ms: row.get::<_, i64>(3)? as u64,
                timestamp,
            })
        })?;

        let mut results = Vec::new();
        for r in rows {
            results.push(r?);
        }
        Ok(results)
    }
}
