//! Config Validation Tests
//!
//! Typo detection on raw TOML and consistency checks on parsed
//! `PipelineConfig`, exercised through the public API only.

use sensor_pipeline::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use sensor_pipeline::config::{ConfigError, PipelineConfig};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_validation_key_warns_with_suggestion() {
    let toml_str = r#"
[validation]
temperture_max = 55.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("temperture_max"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("validation.temperature_max"),
        "Should suggest the correct spelling"
    );
}

#[test]
fn typo_in_section_name_warns() {
    let toml_str = r#"
[retyr]
max_attempts = 3
"#;
    let warnings = validate_unknown_keys(toml_str);
    let fields: Vec<_> = warnings.iter().map(|w| w.field.as_str()).collect();
    assert!(fields.contains(&"retyr"), "got {fields:?}");
    let section = warnings.iter().find(|w| w.field == "retyr").unwrap();
    assert_eq!(section.suggestion.as_deref(), Some("retry"));
}

#[test]
fn full_valid_config_has_no_warnings() {
    let toml_str = r#"
[state]
path = "/var/lib/pipeline/pipeline_config.db"
busy_timeout_ms = 2000
initial_phase = "schematized"

[sensor]
path = "/var/lib/pipeline/sensor_data.db"
table = "sensor_readings"
timestamp_column = "timestamp"
batch_size = 500

[retry]
max_attempts = 4
base_delay_ms = 50
multiplier = 2.0
max_delay_ms = 2000

[validation]
temperature_min = -30.0
temperature_max = 55.0
humidity_min = 0.0
humidity_max = 100.0

[routing]
site_id = "north_ridge"
node_id = "edge-2"
id_column = "sensor_id"

[routing.derived_fields]
pressure = 1010.0
blade_pitch = 4.5

[routing.buckets]
validated = "acme-validated"
anomalies = "acme-anomalies"

[metadata]
pipeline_version = "0.9.0"
git_sha = "abc1234"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(
        warnings.is_empty(),
        "Valid config should produce 0 warnings, got: {:?}",
        warnings.iter().map(|w| &w.field).collect::<Vec<_>>()
    );

    let config = PipelineConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.routing.derived_fields.get("blade_pitch"), Some(&4.5));
    assert_eq!(config.sensor.batch_size, 500);
    assert_eq!(config.retry.max_attempts, 4);
}

#[test]
fn unknown_keys_do_not_fail_parsing() {
    let config = PipelineConfig::from_toml_str("[sensor]\nbatch_sise = 10\n").unwrap();
    assert_eq!(config.sensor.batch_size, 1000, "misspelled key leaves the default");
}

#[test]
fn far_off_key_gets_no_suggestion() {
    let known = known_config_keys();
    assert_eq!(suggest_correction("completely_unrelated_setting", &known), None);
    assert_eq!(
        suggest_correction("sensor.tabel", &known).as_deref(),
        Some("sensor.table")
    );
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn inverted_humidity_bounds_fail_load() {
    let err = PipelineConfig::from_toml_str(
        r#"
[validation]
humidity_min = 80.0
humidity_max = 20.0
"#,
    )
    .unwrap_err();
    match err {
        ConfigError::Validation(errors) => {
            assert!(errors.iter().any(|e| e.contains("validation.humidity")), "{errors:?}");
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn all_errors_are_reported_together() {
    let mut config = PipelineConfig::default();
    config.retry.max_attempts = 0;
    config.retry.multiplier = 0.5;
    config.sensor.batch_size = 0;
    let (errors, _) = validate_ranges(&config);
    assert_eq!(errors.len(), 3, "{errors:?}");
}

#[test]
fn zero_busy_timeout_is_only_a_warning() {
    let mut config = PipelineConfig::default();
    config.state.busy_timeout_ms = 0;
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings.iter().any(|w| w.field == "state.busy_timeout_ms"));
}

#[test]
fn state_store_pointed_at_sensor_db_is_rejected() {
    let err = PipelineConfig::from_toml_str(
        r#"
[state]
path = "/data/sensor_data.db"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}
