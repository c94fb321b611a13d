//! Record shapes that flow through the router.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of the external sensor table, column name to value.
///
/// The shape belongs to the sensor database; nothing here assumes which
/// columns exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorRecord(Map<String, Value>);

impl SensorRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Numeric value of a column. Strings, booleans and nulls are not numbers.
    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.0.get(column).and_then(Value::as_f64)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Coerce a stored value to a number the way sensor collectors write them.
///
/// Some collectors store readings as TEXT, so `"25.5"` counts as 25.5.
pub fn numeric_reading(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

impl From<Map<String, Value>> for SensorRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SensorRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Audit-trail stamp attached to every transformed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub stage: String,
    /// RFC 3339, UTC.
    pub processed_at: String,
    pub transformation_hash: String,
    pub node_id: String,
    pub git_sha: String,
    pub pipeline_version: String,
}

/// Canonical-shape record from the schematized/validated transform.
///
/// `fields` holds the original measurements plus derived defaults and is
/// flattened on serialization, so the output reads as one flat object with a
/// nested `pipeline_metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedRecord {
    pub turbine_id: String,
    pub site_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub pipeline_metadata: PipelineMetadata,
}

impl TransformedRecord {
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    /// Reading used by range checks: numbers as-is, numeric text parsed,
    /// booleans as 1/0. Anything else reads as 0.0.
    pub fn reading(&self, field: &str) -> f64 {
        self.fields.get(field).and_then(numeric_reading).unwrap_or(0.0)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Flat JSON view including identifiers and metadata, as the validator
    /// capability and the uploader see it.
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 3);
        map.insert("turbine_id".into(), Value::String(self.turbine_id.clone()));
        map.insert("site_id".into(), Value::String(self.site_id.clone()));
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        map.insert(
            "pipeline_metadata".into(),
            serde_json::to_value(&self.pipeline_metadata).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }
}

/// A record on its way to a destination: untouched, or transformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoutedRecord {
    Transformed(TransformedRecord),
    Passthrough(SensorRecord),
}

impl RoutedRecord {
    pub fn as_transformed(&self) -> Option<&TransformedRecord> {
        match self {
            Self::Transformed(t) => Some(t),
            Self::Passthrough(_) => None,
        }
    }

    pub fn metadata(&self) -> Option<&PipelineMetadata> {
        self.as_transformed().map(|t| &t.pipeline_metadata)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Transformed(t) => t.to_value(),
            Self::Passthrough(r) => Value::Object(r.fields().clone()),
        }
    }
}

/// Why a record failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub message: String,
    /// Offending field(s); several are joined with `;`.
    pub path: String,
}

impl Violation {
    pub fn new(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at {})", self.message, self.path)
    }
}

/// A routed record plus its verdict.
///
/// Serializes as the record's own flat object with `violation_message` and
/// `violation_path` added when invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub record: RoutedRecord,
    pub violation: Option<Violation>,
}

impl ValidationOutcome {
    pub fn valid(record: RoutedRecord) -> Self {
        Self {
            record,
            violation: None,
        }
    }

    pub fn invalid(record: RoutedRecord, violation: Violation) -> Self {
        Self {
            record,
            violation: Some(violation),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.violation.is_none()
    }

    pub fn to_value(&self) -> Value {
        let mut value = self.record.to_value();
        if let (Some(v), Value::Object(map)) = (&self.violation, &mut value) {
            map.insert("violation_message".into(), Value::String(v.message.clone()));
            map.insert("violation_path".into(), Value::String(v.path.clone()));
        }
        value
    }
}

impl Serialize for ValidationOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}
