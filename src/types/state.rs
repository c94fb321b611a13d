//! Rows of the phase configuration database.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Phase;

/// Where the reported active phase came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseSource {
    /// An explicit `set_phase` row.
    Persisted,
    /// The initial-phase hint, in effect until the first `set_phase`.
    Hint,
    /// The built-in `raw` default (bootstrap row, no hint).
    Default,
}

impl fmt::Display for PhaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Persisted => "persisted",
            Self::Hint => "hint",
            Self::Default => "default",
        })
    }
}

/// One row of `pipeline_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfigRecord {
    /// `None` only when the phase comes from the hint and no row backs it.
    pub id: Option<i64>,
    #[serde(rename = "pipeline_type")]
    pub phase: Phase,
    pub created_at: String,
    pub created_by: Option<String>,
    pub reason: Option<String>,
    pub is_active: bool,
    pub source: PhaseSource,
}

/// One row of `pipeline_executions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    #[serde(rename = "pipeline_type")]
    pub phase: Phase,
    pub records_processed: u64,
    /// Destination identifiers the run wrote to.
    #[serde(rename = "s3_locations")]
    pub destinations: Vec<String>,
    pub job_id: Option<String>,
    pub created_at: String,
}
