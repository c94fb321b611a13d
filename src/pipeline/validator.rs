//! Record validators for the validated phase.
//!
//! [`RangeValidator`] is the built-in policy: temperature and humidity must
//! sit inside configured bounds, and a missing or non-numeric reading counts
//! as `0.0`. Numeric text such as `"25.5"` is checked like a number.
//! [`SchemaValidator`] checks a local JSON schema instead.

use std::path::Path;

use jsonschema::error::ValidationErrorKind;
use serde_json::Value;
use tracing::info;

use crate::config::ValidationConfig;
use crate::error::{PipelineError, Result};
use crate::types::{TransformedRecord, Violation};

/// Pass/fail decision for one transformed record.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, record: &TransformedRecord) -> std::result::Result<(), Violation>;

    /// Validator name for logging.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRange {
    pub field: String,
    pub min: f64,
    pub max: f64,
}

/// Inclusive range checks. Every failing field is reported in one violation.
#[derive(Debug, Clone)]
pub struct RangeValidator {
    ranges: Vec<FieldRange>,
}

impl RangeValidator {
    pub fn new(ranges: Vec<FieldRange>) -> Self {
        Self { ranges }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(vec![
            FieldRange {
                field: "temperature".into(),
                min: config.temperature_min,
                max: config.temperature_max,
            },
            FieldRange {
                field: "humidity".into(),
                min: config.humidity_min,
                max: config.humidity_max,
            },
        ])
    }
}

impl Default for RangeValidator {
    fn default() -> Self {
        Self::from_config(&ValidationConfig::default())
    }
}

impl RecordValidator for RangeValidator {
    fn validate(&self, record: &TransformedRecord) -> std::result::Result<(), Violation> {
        let mut messages = Vec::new();
        let mut paths = Vec::new();

        for range in &self.ranges {
            // Absent data is not an anomaly.
            let value = record.reading(&range.field);
            if value < range.min || value > range.max {
                messages.push(format!(
                    "{} {} outside [{}, {}]",
                    range.field, value, range.min, range.max
                ));
                paths.push(range.field.as_str());
            }
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(Violation::new(messages.join("; "), paths.join(";")))
        }
    }

    fn name(&self) -> &'static str {
        "range"
    }
}

/// Checks records against a local JSON schema. Reports the first error.
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator {
    pub fn new(schema: Value) -> Result<Self> {
        if !schema.is_object() {
            return Err(PipelineError::Configuration(
                "validation schema must be a JSON object".into(),
            ));
        }
        let validator = jsonschema::options()
            .build(&schema)
            .map_err(|e| PipelineError::Configuration(format!("invalid validation schema: {e}")))?;
        Ok(Self { validator })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::NotFound(format!("schema file not found: {}", path.display()))
            } else {
                PipelineError::Io(e)
            }
        })?;
        let validator = Self::new(serde_json::from_str(&raw)?)?;
        info!(path = %path.display(), "Loaded validation schema");
        Ok(validator)
    }
}

/// Dotted field path for a JSON pointer, `$` for the record itself.
fn dotted_path(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        "$".to_string()
    } else {
        trimmed.replace('/', ".")
    }
}

impl RecordValidator for SchemaValidator {
    fn validate(&self, record: &TransformedRecord) -> std::result::Result<(), Violation> {
        let instance = record.to_value();
        self.validator.validate(&instance).map_err(|error| {
            let mut path = dotted_path(&error.instance_path.to_string());
            // A missing property is reported against its parent; name the property.
            if let ValidationErrorKind::Required { property } = &error.kind {
                if let Some(name) = property.as_str() {
                    path = if path == "$" { name.to_string() } else { format!("{path}.{name}") };
                }
            }
            Violation::new(error.to_string(), path)
        })
    }

    fn name(&self) -> &'static str {
        "json-schema"
    }
}
