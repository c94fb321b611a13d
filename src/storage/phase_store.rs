//! Phase State Store
//!
//! Single source of truth for which phase is active, shared by independent
//! processes through one SQLite file. Every operation opens its own
//! connection and drops it before returning; nothing is cached between calls.
//!
//! `set_phase` takes the write lock (`BEGIN IMMEDIATE`) before it reads or
//! writes anything, so the deactivate-then-insert pair is serialised across
//! processes and at most one row is ever active.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use super::schema;
use crate::backoff::{retry_on_contention, BackoffPolicy, Sleeper, ThreadSleeper};
use crate::config::{defaults, names_sensor_db, StoreConfig};
use crate::error::{PipelineError, Result};
use crate::types::{ExecutionRecord, Phase, PhaseConfigRecord, PhaseSource};

const TARGET: &str = "state store";

const SELECT_CONFIG_COLUMNS: &str =
    "SELECT id, pipeline_type, created_at, created_by, reason, is_active, is_bootstrap FROM pipeline_config";

/// Multi-writer phase configuration store.
#[derive(Clone)]
pub struct PhaseStateStore {
    config: StoreConfig,
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for PhaseStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseStateStore")
            .field("path", &self.config.path)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PhaseStateStore {
    /// Build a store without touching the file. Call [`initialize`](Self::initialize)
    /// before use, or use [`open`](Self::open).
    pub fn new(config: StoreConfig, policy: BackoffPolicy) -> Result<Self> {
        check_path(&config.path)?;
        Ok(Self {
            config,
            policy,
            sleeper: Arc::new(ThreadSleeper),
        })
    }

    /// Build the store and run [`initialize`](Self::initialize).
    pub fn open(config: StoreConfig, policy: BackoffPolicy) -> Result<Self> {
        let store = Self::new(config, policy)?;
        store.initialize()?;
        Ok(store)
    }

    /// Replace the sleep step used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.config.path, flags)?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        Ok(conn)
    }

    fn with_retry<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        retry_on_contention(&self.policy, self.sleeper.as_ref(), TARGET, op)
    }

    /// Create tables, migrate columns and write the bootstrap row when no row
    /// is active. Safe to run from several processes at once.
    pub fn initialize(&self) -> Result<()> {
        let bootstrapped = self.with_retry(|_| {
            let mut conn = self.connect()?;
            schema::enable_wal(&conn)?;

            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            schema::initialize_schema(&tx)?;

            let active: i64 = tx.query_row(
                "SELECT COUNT(*) FROM pipeline_config WHERE is_active = 1",
                [],
                |row| row.get(0),
            )?;
            let bootstrapped = if active == 0 {
                let created_at = next_created_at(&tx, schema::CONFIG_TABLE)?;
                tx.execute(
                    "INSERT INTO pipeline_config
                        (pipeline_type, created_at, created_by, reason, is_active, is_bootstrap)
                     VALUES (?1, ?2, ?3, ?4, 1, 1)",
                    params![
                        Phase::Raw.as_str(),
                        created_at,
                        defaults::BOOTSTRAP_ACTOR,
                        defaults::BOOTSTRAP_REASON
                    ],
                )?;
                true
            } else {
                false
            };
            tx.commit()?;
            Ok(bootstrapped)
        })?;

        if bootstrapped {
            info!(path = %self.config.path.display(), "Initialized phase store with default phase 'raw'");
        } else {
            debug!(path = %self.config.path.display(), "Phase store already initialized");
        }
        Ok(())
    }

    /// The active phase.
    ///
    /// Until the first explicit `set_phase`, an initial-phase hint (when
    /// configured) wins over the bootstrap row. After that the persisted row
    /// is authoritative.
    pub fn get_current_phase(&self) -> Result<PhaseConfigRecord> {
        let (active, explicit_rows) = self.with_retry(|_| {
            let mut conn = self.connect()?;
            let tx = conn.transaction()?;
            let active = tx
                .query_row(
                    &format!("{SELECT_CONFIG_COLUMNS} WHERE is_active = 1 ORDER BY id DESC LIMIT 1"),
                    [],
                    config_row,
                )
                .optional()?;
            let explicit: i64 = tx.query_row(
                "SELECT COUNT(*) FROM pipeline_config WHERE is_bootstrap = 0",
                [],
                |row| row.get(0),
            )?;
            tx.finish()?;
            Ok((active, explicit))
        })?;

        if explicit_rows == 0 {
            if let Some(hint) = self.config.initial_phase_hint() {
                return Ok(PhaseConfigRecord {
                    id: active.as_ref().and_then(|r| r.id),
                    phase: hint,
                    created_at: active
                        .map(|r| r.created_at)
                        .unwrap_or_else(|| format_timestamp(Utc::now())),
                    created_by: Some(defaults::HINT_ACTOR.to_string()),
                    reason: Some("Initial phase hint".to_string()),
                    is_active: true,
                    source: PhaseSource::Hint,
                });
            }
        }

        Ok(active.unwrap_or_else(|| PhaseConfigRecord {
            id: None,
            phase: Phase::default(),
            created_at: format_timestamp(Utc::now()),
            created_by: Some(defaults::BOOTSTRAP_ACTOR.to_string()),
            reason: Some(defaults::BOOTSTRAP_REASON.to_string()),
            is_active: true,
            source: PhaseSource::Default,
        }))
    }

    /// Atomically make `phase` the active one.
    ///
    /// Either the old row is deactivated and the new one inserted, or
    /// nothing changes.
    pub fn set_phase(&self, phase: &Phase, actor: &str, reason: Option<&str>) -> Result<PhaseConfigRecord> {
        if !phase.is_recognized() {
            return Err(PipelineError::Validation(format!(
                "refusing to persist unrecognized phase '{phase}'"
            )));
        }

        let record = self.with_retry(|attempt| {
            let mut conn = self.connect()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let created_at = next_created_at(&tx, schema::CONFIG_TABLE)?;
            let deactivated = tx.execute(
                "UPDATE pipeline_config SET is_active = 0 WHERE is_active = 1",
                [],
            )?;
            tx.execute(
                "INSERT INTO pipeline_config (pipeline_type, created_at, created_by, reason, is_active)
                 VALUES (?1, ?2, ?3, ?4, 1)",
                params![phase.as_str(), created_at, actor, reason],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            debug!(attempt, deactivated, id, "Phase row committed");
            Ok(PhaseConfigRecord {
                id: Some(id),
                phase: phase.clone(),
                created_at,
                created_by: Some(actor.to_string()),
                reason: reason.map(str::to_string),
                is_active: true,
                source: PhaseSource::Persisted,
            })
        })?;

        info!(phase = %phase, actor, reason = reason.unwrap_or(""), "Pipeline phase changed");
        Ok(record)
    }

    /// Phase change history, most recent first.
    pub fn get_phase_history(&self, limit: Option<usize>) -> Result<Vec<PhaseConfigRecord>> {
        self.with_retry(|_| {
            let conn = self.connect()?;
            let mut stmt = conn.prepare(&format!("{SELECT_CONFIG_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
            let rows = stmt
                .query_map(params![sql_limit(limit)], config_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Append one completed run to the execution log.
    pub fn record_execution(
        &self,
        phase: &Phase,
        records_processed: u64,
        destinations: &[String],
        job_id: Option<&str>,
    ) -> Result<ExecutionRecord> {
        let locations = serde_json::to_string(destinations)?;
        let processed = i64::try_from(records_processed).map_err(|_| {
            PipelineError::Validation(format!(
                "records_processed {records_processed} exceeds the storable maximum {}",
                i64::MAX
            ))
        })?;

        let record = self.with_retry(|_| {
            let mut conn = self.connect()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let created_at = next_created_at(&tx, schema::EXECUTIONS_TABLE)?;
            tx.execute(
                "INSERT INTO pipeline_executions (pipeline_type, records_processed, s3_locations, job_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![phase.as_str(), processed, locations, job_id, created_at],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(ExecutionRecord {
                id,
                phase: phase.clone(),
                records_processed,
                destinations: destinations.to_vec(),
                job_id: job_id.map(str::to_string),
                created_at,
            })
        })?;

        info!(
            phase = %phase,
            records = records_processed,
            destinations = destinations.len(),
            job_id = job_id.unwrap_or(""),
            "Execution recorded"
        );
        Ok(record)
    }

    /// Execution log, most recent first.
    pub fn get_execution_history(&self, limit: Option<usize>) -> Result<Vec<ExecutionRecord>> {
        self.with_retry(|_| {
            let conn = self.connect()?;
            let mut stmt = conn.prepare(
                "SELECT id, pipeline_type, records_processed, s3_locations, job_id, created_at
                   FROM pipeline_executions ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![sql_limit(limit)], execution_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

fn check_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(PipelineError::Configuration("state store path is empty".into()));
    }
    if names_sensor_db(path) {
        return Err(PipelineError::Configuration(format!(
            "state store path {} points at the sensor database",
            path.display()
        )));
    }
    if path.is_dir() {
        return Err(PipelineError::Configuration(format!(
            "state store path {} is a directory",
            path.display()
        )));
    }
    Ok(())
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
}

fn config_row(row: &Row<'_>) -> rusqlite::Result<PhaseConfigRecord> {
    let phase: String = row.get(1)?;
    let is_bootstrap = row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0;
    Ok(PhaseConfigRecord {
        id: Some(row.get(0)?),
        phase: Phase::parse(&phase),
        created_at: row.get(2)?,
        created_by: row.get(3)?,
        reason: row.get(4)?,
        is_active: row.get::<_, Option<i64>>(5)?.unwrap_or(0) != 0,
        source: if is_bootstrap {
            PhaseSource::Default
        } else {
            PhaseSource::Persisted
        },
    })
}

fn execution_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let phase: String = row.get(1)?;
    let locations: Option<String> = row.get(3)?;
    let destinations = match locations.as_deref() {
        None | Some("") => Vec::new(),
        Some(json) => serde_json::from_str(json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
    };
    let processed = row.get::<_, Option<i64>>(2)?.unwrap_or(0);
    let records_processed = u64::try_from(processed).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        phase: Phase::parse(&phase),
        records_processed,
        destinations,
        job_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Creation time for a new row: now, or one microsecond past the newest row
/// if the clock has not moved on. Must run inside the write transaction.
fn next_created_at(conn: &Connection, table: &str) -> rusqlite::Result<String> {
    let previous: Option<String> = conn
        .query_row(
            &format!("SELECT created_at FROM {table} ORDER BY id DESC LIMIT 1"),
            [],
            |row| row.get(0),
        )
        .optional()?;

    let now = Utc::now().trunc_subsecs(6);
    let next = match previous.as_deref().and_then(parse_timestamp) {
        Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
        _ => now,
    };
    Ok(format_timestamp(next))
}
