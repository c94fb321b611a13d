//! Canonical transform for the schematized and validated phases.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::{defaults, RoutingConfig};
use crate::types::{PipelineMetadata, SensorRecord, TransformedRecord};

/// Keys the canonical shape owns; a sensor column with one of these names
/// never lands in `fields`.
const RESERVED: [&str; 3] = ["turbine_id", "site_id", "pipeline_metadata"];

/// Maps a raw sensor row onto the turbine record shape.
#[derive(Debug, Clone)]
pub struct CanonicalTransform {
    site_id: String,
    id_column: String,
    derived_fields: BTreeMap<String, f64>,
}

impl CanonicalTransform {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            site_id: config.site_id.clone(),
            id_column: config.id_column.clone(),
            derived_fields: config.derived_fields.clone(),
        }
    }

    /// `turbine_<id>` from the record's id column, `turbine_001` when absent.
    pub fn turbine_id(&self, record: &SensorRecord) -> String {
        let suffix = match record.get(&self.id_column) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => defaults::FALLBACK_ID.to_string(),
        };
        format!("turbine_{suffix}")
    }

    pub fn apply(&self, record: &SensorRecord, metadata: &PipelineMetadata) -> TransformedRecord {
        let site_id = match record.get("site_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => self.site_id.clone(),
        };

        let mut fields: Map<String, Value> = record
            .fields()
            .iter()
            .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (name, default) in &self.derived_fields {
            let missing = fields.get(name).map_or(true, Value::is_null);
            if missing {
                if let Some(n) = serde_json::Number::from_f64(*default) {
                    fields.insert(name.clone(), Value::Number(n));
                }
            }
        }

        TransformedRecord {
            turbine_id: self.turbine_id(record),
            site_id,
            fields,
            pipeline_metadata: metadata.clone(),
        }
    }
}
