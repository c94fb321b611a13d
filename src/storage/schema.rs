//! DDL and idempotent migrations for the phase configuration database.
//!
//! Every statement here runs inside the caller's IMMEDIATE transaction, so two
//! processes initialising the same file serialise on the write lock instead of
//! racing between the existence check and the DDL.

use std::collections::HashSet;

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::config::defaults;

pub const CONFIG_TABLE: &str = "pipeline_config";
pub const EXECUTIONS_TABLE: &str = "pipeline_executions";

const CREATE_CONFIG_TABLE: &str = "CREATE TABLE IF NOT EXISTS pipeline_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    created_by TEXT,
    reason TEXT,
    is_active INTEGER NOT NULL DEFAULT 0,
    is_bootstrap INTEGER NOT NULL DEFAULT 0
)";

const CREATE_EXECUTIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS pipeline_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_type TEXT NOT NULL,
    records_processed INTEGER NOT NULL DEFAULT 0,
    s3_locations TEXT NOT NULL DEFAULT '[]',
    job_id TEXT,
    created_at TEXT NOT NULL
)";

const CREATE_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_pipeline_config_created_at ON pipeline_config (created_at);
    CREATE INDEX IF NOT EXISTS idx_pipeline_config_active ON pipeline_config (is_active);
    CREATE INDEX IF NOT EXISTS idx_pipeline_executions_created_at ON pipeline_executions (created_at);";

/// Columns added after the first release, as `(column, ALTER statement)`.
const CONFIG_MIGRATIONS: &[(&str, &str)] = &[
    ("created_by", "ALTER TABLE pipeline_config ADD COLUMN created_by TEXT"),
    ("reason", "ALTER TABLE pipeline_config ADD COLUMN reason TEXT"),
    ("is_active", "ALTER TABLE pipeline_config ADD COLUMN is_active INTEGER NOT NULL DEFAULT 0"),
    (
        "is_bootstrap",
        "ALTER TABLE pipeline_config ADD COLUMN is_bootstrap INTEGER NOT NULL DEFAULT 0",
    ),
];

const EXECUTION_MIGRATIONS: &[(&str, &str)] = &[
    (
        "records_processed",
        "ALTER TABLE pipeline_executions ADD COLUMN records_processed INTEGER NOT NULL DEFAULT 0",
    ),
    (
        "s3_locations",
        "ALTER TABLE pipeline_executions ADD COLUMN s3_locations TEXT NOT NULL DEFAULT '[]'",
    ),
    ("job_id", "ALTER TABLE pipeline_executions ADD COLUMN job_id TEXT"),
];

/// Switch the file to WAL so readers never block the writer.
pub fn enable_wal(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    debug!(journal_mode = %mode, "Journal mode set");
    Ok(())
}

/// Create tables, add missing columns and build indexes.
pub fn initialize_schema(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tolerate_existing(tx.execute_batch(CREATE_CONFIG_TABLE))?;
    tolerate_existing(tx.execute_batch(CREATE_EXECUTIONS_TABLE))?;

    let added = migrate_columns(tx, CONFIG_TABLE, CONFIG_MIGRATIONS)?;
    if added.contains(&"is_active") {
        // Legacy table: only the newest row may come out active.
        let marked = tx.execute(
            "UPDATE pipeline_config
                SET is_active = CASE WHEN id = (SELECT MAX(id) FROM pipeline_config) THEN 1 ELSE 0 END",
            [],
        )?;
        info!(rows = marked, "Migrated legacy pipeline_config, newest row marked active");
    }
    if added.contains(&"is_bootstrap") {
        // Older builds told the bootstrap row apart by its actor and reason.
        // Only the very first row can be that row.
        tx.execute(
            "UPDATE pipeline_config SET is_bootstrap = 1
              WHERE id = (SELECT MIN(id) FROM pipeline_config)
                AND created_by = ?1 AND reason = ?2",
            [defaults::BOOTSTRAP_ACTOR, defaults::BOOTSTRAP_REASON],
        )?;
    }
    migrate_columns(tx, EXECUTIONS_TABLE, EXECUTION_MIGRATIONS)?;

    tolerate_existing(tx.execute_batch(CREATE_INDEXES))?;
    Ok(())
}

/// Column names of `table`, via `PRAGMA table_info`.
pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(columns)
}

fn migrate_columns(
    conn: &Connection,
    table: &str,
    migrations: &[(&'static str, &str)],
) -> rusqlite::Result<Vec<&'static str>> {
    let existing = table_columns(conn, table)?;
    let mut added = Vec::new();
    for (column, sql) in migrations {
        if existing.contains(*column) {
            continue;
        }
        if tolerate_existing(conn.execute(sql, []).map(|_| ()))? {
            info!(table, column, "Added missing column");
            added.push(*column);
        }
    }
    Ok(added)
}

/// Treat "already exists" and "duplicate column" as success.
///
/// Returns `Ok(true)` when the statement applied, `Ok(false)` when another
/// process got there first.
fn tolerate_existing(result: rusqlite::Result<()>) -> rusqlite::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
            if msg.contains("already exists") || msg.contains("duplicate column name") =>
        {
            debug!(reason = %msg, "Schema object already present");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::TransactionBehavior;

    fn init(conn: &mut Connection) {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        initialize_schema(&tx).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_fresh_schema_has_expected_columns() {
        let mut conn = Connection::open_in_memory().unwrap();
        init(&mut conn);

        let config = table_columns(&conn, CONFIG_TABLE).unwrap();
        for col in ["id", "pipeline_type", "created_at", "created_by", "reason", "is_active", "is_bootstrap"] {
            assert!(config.contains(col), "pipeline_config missing {col}");
        }
        let executions = table_columns(&conn, EXECUTIONS_TABLE).unwrap();
        for col in ["id", "pipeline_type", "records_processed", "s3_locations", "job_id", "created_at"] {
            assert!(executions.contains(col), "pipeline_executions missing {col}");
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        init(&mut conn);
        init(&mut conn);
        init(&mut conn);
    }

    #[test]
    fn test_legacy_table_gets_single_active_row() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE pipeline_config (
                id INTEGER PRIMARY KEY,
                pipeline_type TEXT NOT NULL,
                created_at TEXT NOT NULL
             );
             INSERT INTO pipeline_config (pipeline_type, created_at) VALUES ('raw', '2024-01-01T00:00:00Z');
             INSERT INTO pipeline_config (pipeline_type, created_at) VALUES ('schematized', '2024-01-02T00:00:00Z');
             INSERT INTO pipeline_config (pipeline_type, created_at) VALUES ('validated', '2024-01-03T00:00:00Z');",
        )
        .unwrap();

        init(&mut conn);

        let active: Vec<String> = conn
            .prepare("SELECT pipeline_type FROM pipeline_config WHERE is_active = 1")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(active, vec!["validated".to_string()]);
    }

    #[test]
    fn test_legacy_bootstrap_row_is_flagged() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE pipeline_config (
                id INTEGER PRIMARY KEY,
                pipeline_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                created_by TEXT,
                reason TEXT,
                is_active INTEGER NOT NULL DEFAULT 0
             );
             INSERT INTO pipeline_config (pipeline_type, created_at, created_by, reason, is_active)
                VALUES ('raw', '2024-01-01T00:00:00Z', 'system', 'Initial configuration', 0);
             INSERT INTO pipeline_config (pipeline_type, created_at, created_by, reason, is_active)
                VALUES ('validated', '2024-01-02T00:00:00Z', 'system', 'Initial configuration', 1);",
        )
        .unwrap();

        init(&mut conn);

        let flagged: Vec<i64> = conn
            .prepare("SELECT id FROM pipeline_config WHERE is_bootstrap = 1")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(flagged, vec![1], "only the first row can be the bootstrap row");
    }

    #[test]
    fn test_unrelated_error_is_not_tolerated() {
        let conn = Connection::open_in_memory().unwrap();
        let result = tolerate_existing(conn.execute_batch("SELECT * FROM no_such_table"));
        assert!(result.is_err());
    }
}
