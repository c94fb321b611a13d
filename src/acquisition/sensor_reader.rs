//! Read-only access to the externally produced sensor database.
//!
//! Every connection is opened with `SQLITE_OPEN_READ_ONLY` through a
//! `file:...?mode=ro` URI and `PRAGMA query_only`, so writes are refused by
//! SQLite itself whatever the caller does. Connections live for exactly one
//! operation.

use std::iter::FusedIterator;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, OptionalExtension, ToSql};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::backoff::{retry_on_contention, BackoffPolicy, Sleeper, ThreadSleeper};
use crate::error::{is_read_only_refusal, PipelineError, Result};
use crate::config::SensorConfig;
use crate::storage::schema::CONFIG_TABLE;
use crate::types::SensorRecord;

const TARGET: &str = "sensor database";

/// Optional clauses for [`SensorDataReader::read`].
///
/// `where_clause` and `order_by` are spliced into the SQL verbatim and must
/// come from trusted configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub where_clause: Option<String>,
    /// Defaults to `<timestamp_column> DESC`.
    pub order_by: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ReadOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }
}

/// Read-only, retrying reader over one sensor database file.
#[derive(Clone)]
pub struct SensorDataReader {
    config: SensorConfig,
    uri: String,
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
    identifier: Regex,
    select: Regex,
}

impl std::fmt::Debug for SensorDataReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorDataReader")
            .field("path", &self.config.path)
            .field("table", &self.config.table)
            .finish_non_exhaustive()
    }
}

impl SensorDataReader {
    /// Open a reader. Fails at once with `NotFound` when the file is missing
    /// and with `Configuration` when the file is the phase state database.
    pub fn open(config: SensorConfig, policy: BackoffPolicy) -> Result<Self> {
        Self::open_with_sleeper(config, policy, Arc::new(ThreadSleeper))
    }

    pub fn open_with_sleeper(
        config: SensorConfig,
        policy: BackoffPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        if !config.path.is_file() {
            return Err(PipelineError::NotFound(format!(
                "sensor database not found: {}",
                config.path.display()
            )));
        }

        let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        let select = Regex::new(r"(?i)^\s*SELECT\b")
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        let reader = Self {
            uri: read_only_uri(&config.path),
            config,
            policy,
            sleeper,
            identifier,
            select,
        };
        reader.validate_table(&reader.config.table)?;

        let is_state_db = reader.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [CONFIG_TABLE],
                |row| row.get::<_, i64>(0),
            )
        })? > 0;
        if is_state_db {
            return Err(PipelineError::Configuration(format!(
                "{} holds the phase configuration table; the sensor reader must point at the sensor database",
                reader.config.path.display()
            )));
        }

        info!(path = %reader.config.path.display(), table = %reader.config.table, "Sensor database opened read-only");
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Configured default table.
    pub fn table(&self) -> &str {
        &self.config.table
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.uri, flags)?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(conn)
    }

    /// Run `op` on a fresh read-only connection, retrying lock contention.
    ///
    /// The connection is dropped when `op` returns, on every path. A write
    /// attempted inside `op` surfaces as [`PipelineError::ReadOnlyViolation`].
    pub fn with_connection<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&Connection) -> rusqlite::Result<T>,
    {
        retry_on_contention(&self.policy, self.sleeper.as_ref(), TARGET, |attempt| {
            let conn = self.connect().map_err(classify)?;
            if attempt > 1 {
                debug!(attempt, "Retrying sensor database operation");
            }
            op(&conn).map_err(classify)
        })
    }

    /// Rows of `table`. Ordered by the timestamp column, newest first, unless
    /// `order_by` says otherwise.
    pub fn read(&self, table: &str, options: &ReadOptions) -> Result<Vec<SensorRecord>> {
        self.validate_table(table)?;
        let sql = self.build_select(table, options);
        debug!(sql = %sql, "Reading sensor data");
        self.with_connection(|conn| query_records(conn, &sql, &[]))
    }

    /// Run an arbitrary read query with positional parameters.
    ///
    /// The query text must start with the `SELECT` keyword (leading whitespace
    /// and case aside); anything else is rejected before it reaches SQLite.
    /// The check is lexical, so a `WITH ... SELECT` common table expression or
    /// a query that opens with a `--` or `/* */` comment is rejected too. The
    /// connection is read-only either way.
    pub fn read_with_query(&self, query: &str, params: &[Value]) -> Result<Vec<SensorRecord>> {
        if !self.select.is_match(query) {
            warn!(query = %query, "Rejected non-SELECT query on sensor database");
            return Err(PipelineError::Validation(
                "Only SELECT queries are allowed on sensor database".to_string(),
            ));
        }
        let bound: Vec<SqlValue> = params.iter().map(json_to_sql).collect();
        self.with_connection(|conn| {
            let refs: Vec<&dyn ToSql> = bound.iter().map(|v| v as &dyn ToSql).collect();
            query_records(conn, query, &refs)
        })
    }

    /// Lazily page through `table` in batches of `batch_size`.
    ///
    /// Ends after the first short or empty batch. Each call starts again
    /// from offset 0.
    pub fn stream(
        &self,
        table: &str,
        batch_size: usize,
        where_clause: Option<&str>,
        order_by: Option<&str>,
    ) -> Result<SensorStream<'_>> {
        self.validate_table(table)?;
        if batch_size == 0 {
            return Err(PipelineError::Validation("batch_size must be > 0".into()));
        }
        Ok(SensorStream {
            reader: self,
            table: table.to_string(),
            options: ReadOptions {
                where_clause: where_clause.map(str::to_string),
                order_by: order_by.map(str::to_string),
                limit: Some(batch_size),
                offset: Some(0),
            },
            batch_size,
            done: false,
        })
    }

    /// Best-effort liveness probe. Never errors, never retries.
    pub fn verify_connectivity(&self) -> bool {
        let probe = self
            .connect()
            .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)));
        match probe {
            Ok(_) => true,
            Err(e) => {
                debug!(path = %self.config.path.display(), error = %e, "Sensor database probe failed");
                false
            }
        }
    }

    pub(crate) fn validate_table(&self, table: &str) -> Result<()> {
        if self.identifier.is_match(table) {
            Ok(())
        } else {
            Err(PipelineError::Validation(format!("invalid table name '{table}'")))
        }
    }

    fn build_select(&self, table: &str, options: &ReadOptions) -> String {
        let mut sql = format!("SELECT * FROM \"{table}\"");
        if let Some(ref clause) = options.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        sql.push_str(" ORDER BY ");
        match options.order_by {
            Some(ref order) => sql.push_str(order),
            None => {
                sql.push_str(&self.config.timestamp_column);
                sql.push_str(" DESC");
            }
        }
        match (options.limit, options.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        sql
    }
}

/// Finite, non-restartable sequence of batches from [`SensorDataReader::stream`].
#[derive(Debug)]
pub struct SensorStream<'a> {
    reader: &'a SensorDataReader,
    table: String,
    options: ReadOptions,
    batch_size: usize,
    done: bool,
}

impl Iterator for SensorStream<'_> {
    type Item = Result<Vec<SensorRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read(&self.table, &self.options) {
            Ok(batch) => {
                if batch.len() < self.batch_size {
                    self.done = true;
                }
                if batch.is_empty() {
                    return None;
                }
                let offset = self.options.offset.unwrap_or(0) + batch.len();
                self.options.offset = Some(offset);
                Some(Ok(batch))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for SensorStream<'_> {}

fn classify(err: rusqlite::Error) -> PipelineError {
    if is_read_only_refusal(&err) {
        PipelineError::ReadOnlyViolation(err.to_string())
    } else {
        PipelineError::Database(err)
    }
}

/// `file:` URI with the characters SQLite treats specially escaped.
fn read_only_uri(path: &Path) -> String {
    let mut escaped = String::new();
    for c in path.to_string_lossy().chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3f"),
            '#' => escaped.push_str("%23"),
            _ => escaped.push(c),
        }
    }
    format!("file:{escaped}?mode=ro")
}

pub(crate) fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> rusqlite::Result<Vec<SensorRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let mut rows = stmt.query(params)?;

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
        }
        records.push(SensorRecord::from(map));
    }
    Ok(records)
}

pub(crate) fn sensor_row(conn: &Connection, table: &str) -> rusqlite::Result<Option<SensorRecord>> {
    let rows = query_records(conn, &format!("SELECT * FROM \"{table}\" LIMIT 1"), &[])?;
    Ok(rows.into_iter().next())
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect()),
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Does a table of this name exist?
pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|found| found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_for(dir: &tempfile::TempDir) -> SensorDataReader {
        let path = dir.path().join("sensor_data.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sensor_readings (id INTEGER PRIMARY KEY, timestamp TEXT, temperature REAL, payload BLOB);
             INSERT INTO sensor_readings (timestamp, temperature, payload) VALUES ('2024-01-01T00:00:00Z', 21.5, x'0aff');
             INSERT INTO sensor_readings (timestamp, temperature, payload) VALUES ('2024-01-02T00:00:00Z', NULL, NULL);",
        )
        .unwrap();
        drop(conn);
        SensorDataReader::open(SensorConfig::at(path), BackoffPolicy::default()).unwrap()
    }

    #[test]
    fn test_build_select_defaults_to_timestamp_desc() {
        let dir = tempfile::tempdir().unwrap();
        let reader = reader_for(&dir);
        let sql = reader.build_select("sensor_readings", &ReadOptions::default());
        assert_eq!(sql, "SELECT * FROM \"sensor_readings\" ORDER BY timestamp DESC");
    }

    #[test]
    fn test_offset_without_limit_is_legal() {
        let dir = tempfile::tempdir().unwrap();
        let reader = reader_for(&dir);
        let options = ReadOptions {
            offset: Some(1),
            ..ReadOptions::default()
        };
        let sql = reader.build_select("sensor_readings", &options);
        assert!(sql.ends_with("LIMIT -1 OFFSET 1"), "{sql}");
        assert_eq!(reader.read("sensor_readings", &options).unwrap().len(), 1);
    }

    #[test]
    fn test_values_convert_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let reader = reader_for(&dir);
        let rows = reader
            .read("sensor_readings", &ReadOptions::default().with_order_by("id ASC"))
            .unwrap();
        assert_eq!(rows[0].get_f64("temperature"), Some(21.5));
        assert_eq!(rows[0].get("payload"), Some(&Value::String("0aff".into())));
        assert_eq!(rows[1].get("temperature"), Some(&Value::Null));
    }

    #[test]
    fn test_bad_table_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reader = reader_for(&dir);
        let err = reader
            .read("sensor_readings; DROP TABLE x", &ReadOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_uri_escapes_special_characters() {
        assert_eq!(read_only_uri(Path::new("/tmp/a?b#c%d.db")), "file:/tmp/a%3fb%23c%25d.db?mode=ro");
    }

    #[test]
    fn test_json_params_bind() {
        let dir = tempfile::tempdir().unwrap();
        let reader = reader_for(&dir);
        let rows = reader
            .read_with_query(
                "SELECT id FROM sensor_readings WHERE temperature > ?1",
                &[Value::from(20)],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
