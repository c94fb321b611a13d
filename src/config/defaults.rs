//! System-wide default constants.
//!
//! Grouped by subsystem. Every `#[serde(default = ...)]` in the config
//! structs resolves to one of these.

// ============================================================================
// State Store
// ============================================================================

/// Default location of the phase configuration database.
pub const STATE_DB_PATH: &str = "pipeline_config.db";

/// How long SQLite waits on a locked file before returning `SQLITE_BUSY` (ms).
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Actor recorded on the bootstrap row written by `initialize()`.
pub const BOOTSTRAP_ACTOR: &str = "system";

/// Reason recorded on the bootstrap row.
pub const BOOTSTRAP_REASON: &str = "Initial configuration";

/// Actor reported when the active phase comes from an environment hint.
pub const HINT_ACTOR: &str = "environment";

// ============================================================================
// Sensor Database
// ============================================================================

/// Default location of the externally produced sensor database.
pub const SENSOR_DB_PATH: &str = "sensor_data.db";

/// Default sensor table.
pub const SENSOR_TABLE: &str = "sensor_readings";

/// Column used for the default `ORDER BY ... DESC`.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Rows fetched per batch by `stream()`.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// File-name fragment that marks a path as the sensor database.
pub const SENSOR_DB_MARKER: &str = "sensor_data";

// ============================================================================
// Retry
// ============================================================================

/// Total attempts for a contended operation, including the first.
pub const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Delay after the first failed attempt (ms).
pub const RETRY_BASE_DELAY_MS: u64 = 100;

/// Growth factor between consecutive delays.
pub const RETRY_MULTIPLIER: f64 = 2.0;

/// Upper bound on any single delay (ms).
pub const RETRY_MAX_DELAY_MS: u64 = 5_000;

// ============================================================================
// Validation
// ============================================================================

pub const TEMPERATURE_MIN: f64 = -20.0;
pub const TEMPERATURE_MAX: f64 = 60.0;
pub const HUMIDITY_MIN: f64 = 0.0;
pub const HUMIDITY_MAX: f64 = 100.0;

// ============================================================================
// Routing / Transform
// ============================================================================

pub const SITE_ID: &str = "site_001";

/// Column holding the source identifier used to derive `turbine_id`.
pub const ID_COLUMN: &str = "id";

/// Identifier suffix used when a record carries no id.
pub const FALLBACK_ID: &str = "001";

/// Derived fields filled in when the record does not carry them.
pub const DERIVED_FIELDS: [(&str, f64); 3] = [
    ("pressure", 1013.25),
    ("wind_speed", 15.0),
    ("power_output", 1500.0),
];

// ============================================================================
// Metadata
// ============================================================================

pub const NODE_ID: &str = "local";

/// Version stamped into metadata when nothing overrides it.
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git SHA reported when the build could not determine one.
pub const UNKNOWN_GIT_SHA: &str = "unknown";

// ============================================================================
// CLI
// ============================================================================

pub const HISTORY_LIMIT: usize = 10;
pub const MONITOR_INTERVAL_SECS: u64 = 2;
pub const SENSOR_PREVIEW_LIMIT: usize = 10;
