//! Processing phases and where each phase sends its output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PipelineError;

/// The processing mode selected for a batch.
///
/// Aliases from older deployments (`ingestion`, `anomalies`, `filtered`)
/// parse to their canonical variant. Names this build does not know map to
/// [`Phase::Unrecognized`], which keeps the original text so nothing about
/// the stored value is lost.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Raw,
    Schematized,
    Validated,
    Aggregated,
    Anomaly,
    Enriched,
    Unrecognized(String),
}

impl Phase {
    /// Every phase an operator can select.
    pub const SELECTABLE: [Phase; 6] = [
        Phase::Raw,
        Phase::Schematized,
        Phase::Validated,
        Phase::Aggregated,
        Phase::Anomaly,
        Phase::Enriched,
    ];

    /// Lenient parse used for values read back from storage. Never fails.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "raw" | "ingestion" => Self::Raw,
            "schematized" => Self::Schematized,
            "validated" => Self::Validated,
            "aggregated" => Self::Aggregated,
            "anomaly" | "anomalies" => Self::Anomaly,
            "enriched" | "filtered" => Self::Enriched,
            _ => Self::Unrecognized(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Raw => "raw",
            Self::Schematized => "schematized",
            Self::Validated => "validated",
            Self::Aggregated => "aggregated",
            Self::Anomaly => "anomaly",
            Self::Enriched => "enriched",
            Self::Unrecognized(name) => name,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    /// Destination(s) for this phase's output.
    pub fn routing(&self) -> Routing {
        match self {
            Self::Raw => Routing::Single(Destination::Ingestion),
            Self::Schematized => Routing::Single(Destination::Schematized),
            Self::Validated => Routing::Split {
                valid: Destination::Validated,
                invalid: Destination::Anomalies,
            },
            Self::Aggregated => Routing::Single(Destination::Aggregated),
            Self::Anomaly => Routing::Single(Destination::Anomalies),
            Self::Enriched => Routing::Single(Destination::Enriched),
            // Unknown phases land in the raw zone rather than nowhere.
            Self::Unrecognized(_) => Routing::Single(Destination::Ingestion),
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Raw
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse for operator input: unknown names are an error.
impl FromStr for Phase {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::parse(s) {
            Self::Unrecognized(name) => Err(PipelineError::Validation(format!(
                "unknown phase '{name}' (expected one of: raw, ingestion, schematized, validated, \
                 aggregated, anomaly, anomalies, enriched, filtered)"
            ))),
            phase => Ok(phase),
        }
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Named storage target for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Ingestion,
    Schematized,
    Validated,
    Anomalies,
    Aggregated,
    Enriched,
}

impl Destination {
    pub const ALL: [Destination; 6] = [
        Destination::Ingestion,
        Destination::Schematized,
        Destination::Validated,
        Destination::Anomalies,
        Destination::Aggregated,
        Destination::Enriched,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Schematized => "schematized",
            Self::Validated => "validated",
            Self::Anomalies => "anomalies",
            Self::Aggregated => "aggregated",
            Self::Enriched => "enriched",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing outcome of a phase: one destination, or SPLIT between two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Routing {
    Single(Destination),
    Split {
        valid: Destination,
        invalid: Destination,
    },
}

impl Routing {
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split { .. })
    }

    /// Where valid records go.
    pub fn primary(&self) -> Destination {
        match *self {
            Self::Single(dest) => dest,
            Self::Split { valid, .. } => valid,
        }
    }

    /// Where invalid records go. Non-split phases never produce any.
    pub fn rejects(&self) -> Option<Destination> {
        match *self {
            Self::Single(_) => None,
            Self::Split { invalid, .. } => Some(invalid),
        }
    }
}

impl fmt::Display for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(dest) => write!(f, "{dest}"),
            Self::Split { .. } => f.write_str("SPLIT"),
        }
    }
}
