//! Audit-trail stamps for processed batches.
//!
//! The transformation hash covers the phase, the pipeline version and the
//! sorted *names* of the routing/validation settings. Values never enter the
//! hash, so a stamp shows which logic ran without exposing configuration.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::{defaults, PipelineConfig};
use crate::types::{Phase, PipelineMetadata};

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Commit the binary was built from, or `"unknown"`.
pub fn build_git_sha() -> &'static str {
    option_env!("PIPELINE_GIT_SHA").unwrap_or(defaults::UNKNOWN_GIT_SHA)
}

/// SHA-256 over `{"config_keys": [...sorted], "pipeline_type": .., "version": ..}`, lower-case hex.
pub fn transformation_hash(phase: &str, version: &str, config_keys: &[String]) -> String {
    let mut keys = config_keys.to_vec();
    keys.sort();
    keys.dedup();
    // serde_json maps are key-sorted, so this serialization is canonical.
    let payload = json!({
        "config_keys": keys,
        "pipeline_type": phase,
        "version": version,
    });
    format!("{:x}", Sha256::digest(payload.to_string().as_bytes()))
}

/// Dotted names of every transform and validation setting, values dropped.
///
/// Bucket names only decide where output lands, so they stay out.
pub fn config_key_names(config: &PipelineConfig) -> Vec<String> {
    let mut keys = Vec::new();
    for (section, value) in [
        ("routing", serde_json::to_value(&config.routing)),
        ("validation", serde_json::to_value(&config.validation)),
    ] {
        if let Ok(value) = value {
            collect_keys(&value, section, &mut keys);
        }
    }
    keys.sort();
    keys
}

fn collect_keys(value: &Value, prefix: &str, out: &mut Vec<String>) {
    if let Value::Object(map) = value {
        for (k, v) in map {
            let path = format!("{prefix}.{k}");
            if path == "routing.buckets" {
                continue;
            }
            if v.is_object() {
                collect_keys(v, &path, out);
            } else {
                out.push(path);
            }
        }
    }
}

/// Builds one [`PipelineMetadata`] per batch.
#[derive(Clone)]
pub struct MetadataGenerator {
    node_id: String,
    pipeline_version: String,
    git_sha: String,
    config_keys: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MetadataGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataGenerator")
            .field("node_id", &self.node_id)
            .field("pipeline_version", &self.pipeline_version)
            .field("git_sha", &self.git_sha)
            .finish_non_exhaustive()
    }
}

impl MetadataGenerator {
    pub fn new(config: &PipelineConfig) -> Self {
        let git_sha = config
            .metadata
            .git_sha
            .clone()
            .filter(|sha| !sha.trim().is_empty())
            .unwrap_or_else(|| build_git_sha().to_string());
        Self {
            node_id: config.routing.node_id.clone(),
            pipeline_version: config.metadata.pipeline_version.clone(),
            git_sha,
            config_keys: config_key_names(config),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn generate(&self, phase: &Phase) -> PipelineMetadata {
        self.generate_for_node(phase, &self.node_id)
    }

    /// Same as [`generate`](Self::generate) with an explicit node id.
    pub fn generate_for_node(&self, phase: &Phase, node_id: &str) -> PipelineMetadata {
        PipelineMetadata {
            stage: phase.as_str().to_string(),
            processed_at: self
                .clock
                .now()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            transformation_hash: transformation_hash(
                phase.as_str(),
                &self.pipeline_version,
                &self.config_keys,
            ),
            node_id: node_id.to_string(),
            git_sha: self.git_sha.clone(),
            pipeline_version: self.pipeline_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()))
    }

    #[test]
    fn test_hash_ignores_key_order_and_duplicates() {
        let a = transformation_hash("validated", "1.0", &["b".into(), "a".into()]);
        let b = transformation_hash("validated", "1.0", &["a".into(), "b".into(), "a".into()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_changes_with_phase_and_version() {
        let keys = vec!["routing.site_id".to_string()];
        let base = transformation_hash("validated", "1.0", &keys);
        assert_ne!(base, transformation_hash("schematized", "1.0", &keys));
        assert_ne!(base, transformation_hash("validated", "1.1", &keys));
    }

    #[test]
    fn test_hash_ignores_config_values() {
        let mut a = PipelineConfig::default();
        let mut b = PipelineConfig::default();
        a.routing.site_id = "public_site".into();
        b.routing.site_id = "secret_site_42".into();
        b.validation.temperature_max = 99.0;

        let ga = MetadataGenerator::new(&a).generate(&Phase::Validated);
        let gb = MetadataGenerator::new(&b).generate(&Phase::Validated);
        assert_eq!(ga.transformation_hash, gb.transformation_hash);
    }

    #[test]
    fn test_config_keys_are_names_only() {
        let keys = config_key_names(&PipelineConfig::default());
        assert!(keys.contains(&"routing.site_id".to_string()));
        assert!(keys.contains(&"routing.derived_fields.pressure".to_string()));
        assert!(keys.contains(&"validation.temperature_min".to_string()));
        assert!(keys.iter().all(|k| !k.contains("site_001")));
    }

    #[test]
    fn test_bucket_names_do_not_change_hash() {
        let a = PipelineConfig::default();
        let mut b = PipelineConfig::default();
        b.routing.buckets.insert("validated".into(), "acme-validated".into());
        assert_eq!(config_key_names(&a), config_key_names(&b));
    }

    #[test]
    fn test_generate_stamps_all_fields() {
        let mut config = PipelineConfig::default();
        config.routing.node_id = "edge-3".into();
        config.metadata.git_sha = Some("abc123".into());
        config.metadata.pipeline_version = "0.9.0".into();

        let meta = MetadataGenerator::new(&config)
            .with_clock(fixed())
            .generate(&Phase::Schematized);

        assert_eq!(meta.stage, "schematized");
        assert_eq!(meta.processed_at, "2024-01-15T10:30:00.000Z");
        assert_eq!(meta.node_id, "edge-3");
        assert_eq!(meta.git_sha, "abc123");
        assert_eq!(meta.pipeline_version, "0.9.0");
    }

    #[test]
    fn test_blank_git_override_falls_back_to_build() {
        let mut config = PipelineConfig::default();
        config.metadata.git_sha = Some("  ".into());
        let meta = MetadataGenerator::new(&config).generate(&Phase::Raw);
        assert_eq!(meta.git_sha, build_git_sha());
        assert!(!meta.git_sha.is_empty());
    }
}
