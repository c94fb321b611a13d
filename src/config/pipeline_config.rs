//! Pipeline configuration structure and loading logic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use crate::backoff::BackoffPolicy;
use crate::error::PipelineError;
use crate::types::{Destination, Phase};

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "PIPELINE_CONFIG";
/// Local file checked when `PIPELINE_CONFIG` is unset.
pub const LOCAL_CONFIG_FILE: &str = "pipeline.toml";

/// Root configuration, one section per subsystem.
///
/// Passed explicitly to constructors; there is no process-wide instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub state: StoreConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub retry: BackoffPolicy,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order, then apply
    /// environment overrides.
    ///
    /// 1. `PIPELINE_CONFIG` environment variable
    /// 2. `./pipeline.toml`
    /// 3. Built-in defaults
    ///
    /// A missing file falls through to the next source. A file that exists
    /// but does not parse or validate is an error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(Path::new(LOCAL_CONFIG_FILE), |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with an explicit local file and variable lookup.
    pub fn load_with<F>(local: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load_file_or_default(local, &lookup)?;
        config.apply_env_overrides(lookup);
        Ok(config)
    }

    fn load_file_or_default<F>(local: &Path, lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(CONFIG_ENV).filter(|p| !p.trim().is_empty()) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), "Loaded pipeline config from PIPELINE_CONFIG");
                return Ok(config);
            }
            warn!(path = %path, "PIPELINE_CONFIG points to non-existent file, falling back");
        }

        if local.exists() {
            let config = Self::load_from_file(local)?;
            info!(path = %local.display(), "Loaded pipeline config from local file");
            return Ok(config);
        }

        info!("No pipeline.toml found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load from a specific TOML file. Unknown keys are logged, not rejected.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| match e {
                ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
                other => other,
            })?;
        info!(path = %path.display(), "Pipeline config parsed");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Apply environment overrides through `lookup`, so tests never touch the
    /// real process environment.
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(phase) = get("PIPELINE_TYPE") {
            info!(phase = %phase, "Initial phase hint from PIPELINE_TYPE");
            self.state.initial_phase = Some(phase);
        }
        if let Some(path) = get("PIPELINE_CONFIG_DB") {
            self.state.path = PathBuf::from(path);
        }
        if let Some(path) = get("SENSOR_DB") {
            self.sensor.path = PathBuf::from(path);
        }
        if let Some(version) = get("PIPELINE_VERSION") {
            self.metadata.pipeline_version = version;
        }
        if let Some(node) = get("NODE_ID") {
            self.routing.node_id = node;
        }
    }

    /// Validate every section for internal consistency.
    ///
    /// All problems are collected before returning so the operator sees the
    /// whole list at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (mut errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!(field = %w.field, "{}", w);
        }

        if let Err(e) = self.check_database_wiring() {
            errors.push(e);
        }

        if let Some(ref hint) = self.state.initial_phase {
            if let Err(e) = hint.parse::<Phase>() {
                errors.push(format!("state.initial_phase: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The state store must never be pointed at the sensor database.
    pub fn check_database_wiring(&self) -> Result<(), String> {
        if self.state.path == self.sensor.path {
            return Err(format!(
                "state.path and sensor.path both point to {}",
                self.state.path.display()
            ));
        }
        if names_sensor_db(&self.state.path) {
            return Err(format!(
                "state.path {} looks like the sensor database; the phase store needs its own file",
                self.state.path.display()
            ));
        }
        Ok(())
    }
}

/// True when a path's file name carries the sensor database marker.
pub fn names_sensor_db(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().contains(defaults::SENSOR_DB_MARKER))
        .unwrap_or(false)
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Configuration(e.to_string())
    }
}

// ============================================================================
// State Store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    /// Phase to report until the first explicit `set_phase`.
    pub initial_phase: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::STATE_DB_PATH),
            busy_timeout_ms: defaults::BUSY_TIMEOUT_MS,
            initial_phase: None,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// The hint as a phase. Unknown names are ignored with a warning.
    pub fn initial_phase_hint(&self) -> Option<Phase> {
        let raw = self.initial_phase.as_deref()?;
        match raw.parse::<Phase>() {
            Ok(phase) => Some(phase),
            Err(e) => {
                warn!(hint = %raw, error = %e, "Ignoring unrecognized initial phase hint");
                None
            }
        }
    }
}

// ============================================================================
// Sensor Database
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub path: PathBuf,
    pub table: String,
    pub timestamp_column: String,
    pub busy_timeout_ms: u64,
    pub batch_size: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::SENSOR_DB_PATH),
            table: defaults::SENSOR_TABLE.to_string(),
            timestamp_column: defaults::TIMESTAMP_COLUMN.to_string(),
            busy_timeout_ms: defaults::BUSY_TIMEOUT_MS,
            batch_size: defaults::DEFAULT_BATCH_SIZE,
        }
    }
}

impl SensorConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Bounds used by the default range validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
    /// Local JSON schema file; when set it replaces the range validator.
    pub schema_path: Option<PathBuf>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            temperature_min: defaults::TEMPERATURE_MIN,
            temperature_max: defaults::TEMPERATURE_MAX,
            humidity_min: defaults::HUMIDITY_MIN,
            humidity_max: defaults::HUMIDITY_MAX,
            schema_path: None,
        }
    }
}

// ============================================================================
// Routing / Transform
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub site_id: String,
    pub node_id: String,
    /// Column whose value becomes the `turbine_<id>` identifier.
    pub id_column: String,
    /// Fields added by the canonical transform when absent from the record.
    pub derived_fields: BTreeMap<String, f64>,
    /// Destination name to bucket name. Missing entries use the destination name.
    pub buckets: BTreeMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            site_id: defaults::SITE_ID.to_string(),
            node_id: defaults::NODE_ID.to_string(),
            id_column: defaults::ID_COLUMN.to_string(),
            derived_fields: defaults::DERIVED_FIELDS
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
            buckets: BTreeMap::new(),
        }
    }
}

impl RoutingConfig {
    pub fn bucket_for(&self, destination: Destination) -> String {
        self.buckets
            .get(destination.as_str())
            .cloned()
            .unwrap_or_else(|| destination.as_str().to_string())
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub pipeline_version: String,
    /// Overrides the build-embedded commit.
    pub git_sha: Option<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            pipeline_version: defaults::PIPELINE_VERSION.to_string(),
            git_sha: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.state.path, PathBuf::from("pipeline_config.db"));
        assert_eq!(config.sensor.table, "sensor_readings");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.routing.derived_fields.get("pressure"), Some(&1013.25));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [sensor]
            table = "turbine_readings"

            [validation]
            temperature_max = 45.0
            "#,
        )
        .unwrap();
        assert_eq!(config.sensor.table, "turbine_readings");
        assert_eq!(config.sensor.batch_size, 1000);
        assert_eq!(config.validation.temperature_max, 45.0);
        assert_eq!(config.validation.temperature_min, -20.0);
    }

    #[test]
    fn test_state_path_naming_sensor_db_is_rejected() {
        let mut config = PipelineConfig::default();
        config.state.path = PathBuf::from("/data/sensor_data_copy.db");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sensor database"), "{err}");
    }

    #[test]
    fn test_same_path_for_both_databases_is_rejected() {
        let mut config = PipelineConfig::default();
        config.sensor.path = PathBuf::from("shared.db");
        config.state.path = PathBuf::from("shared.db");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_initial_phase_is_rejected() {
        let err = PipelineConfig::from_toml_str("[state]\ninitial_phase = \"bogus\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("PIPELINE_TYPE", "validated"),
            ("PIPELINE_CONFIG_DB", "/tmp/state.db"),
            ("SENSOR_DB", "/tmp/sensors.db"),
            ("PIPELINE_VERSION", "2.0.0"),
            ("NODE_ID", "edge-7"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.state.initial_phase.as_deref(), Some("validated"));
        assert_eq!(config.state.path, PathBuf::from("/tmp/state.db"));
        assert_eq!(config.sensor.path, PathBuf::from("/tmp/sensors.db"));
        assert_eq!(config.metadata.pipeline_version, "2.0.0");
        assert_eq!(config.routing.node_id, "edge-7");
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = PipelineConfig::default();
        config.apply_env_overrides(|k| (k == "PIPELINE_TYPE").then(|| "  ".to_string()));
        assert!(config.state.initial_phase.is_none());
    }

    #[test]
    fn test_bucket_override() {
        let mut routing = RoutingConfig::default();
        routing
            .buckets
            .insert("anomalies".into(), "acme-anomalies-us-west-2".into());
        assert_eq!(routing.bucket_for(Destination::Anomalies), "acme-anomalies-us-west-2");
        assert_eq!(routing.bucket_for(Destination::Validated), "validated");
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut config = PipelineConfig::default();
        config.routing.site_id = "north_ridge".into();
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_with_falls_through_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nowhere.toml");
        let explicit = missing.display().to_string();
        let config = PipelineConfig::load_with(&dir.path().join("pipeline.toml"), |k| {
            (k == CONFIG_ENV).then(|| explicit.clone())
        })
        .unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_load_with_prefers_explicit_file_and_applies_env() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.toml");
        let local = dir.path().join("pipeline.toml");
        std::fs::write(&explicit, "[routing]\nsite_id = \"north_ridge\"\n").unwrap();
        std::fs::write(&local, "[routing]\nsite_id = \"south_fork\"\n").unwrap();

        let explicit_str = explicit.display().to_string();
        let config = PipelineConfig::load_with(&local, |k| match k {
            CONFIG_ENV => Some(explicit_str.clone()),
            "NODE_ID" => Some("edge-3".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.routing.site_id, "north_ridge");
        assert_eq!(config.routing.node_id, "edge-3");
    }

    #[test]
    fn test_malformed_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("broken.toml");
        std::fs::write(&explicit, "[sensor\nbatch_size = ").unwrap();

        let explicit_str = explicit.display().to_string();
        let err = PipelineConfig::load_with(&dir.path().join("pipeline.toml"), |k| {
            (k == CONFIG_ENV).then(|| explicit_str.clone())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref p, _) if *p == explicit), "got {err}");
    }

    #[test]
    fn test_invalid_local_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("pipeline.toml");
        std::fs::write(&local, "[state]\ninitial_phase = \"bogus\"\n").unwrap();

        let err = PipelineConfig::load_with(&local, |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "got {err}");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PipelineConfig::load_from_file(Path::new("/nonexistent/pipeline.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
