//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse: the raw TOML is first walked as a `toml::Value` tree and
//! compared against the known field names, emitting warnings with "did you
//! mean?" suggestions. Then normal serde deserialization runs. Warnings never
//! break an existing config.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path for `PipelineConfig`.
///
/// Kept by hand in step with `pipeline_config.rs`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [state]
        "state",
        "state.path",
        "state.busy_timeout_ms",
        "state.initial_phase",
        // [sensor]
        "sensor",
        "sensor.path",
        "sensor.table",
        "sensor.timestamp_column",
        "sensor.busy_timeout_ms",
        "sensor.batch_size",
        // [retry]
        "retry",
        "retry.max_attempts",
        "retry.base_delay_ms",
        "retry.multiplier",
        "retry.max_delay_ms",
        // [validation]
        "validation",
        "validation.temperature_min",
        "validation.temperature_max",
        "validation.humidity_min",
        "validation.humidity_max",
        "validation.schema_path",
        // [routing]
        "routing",
        "routing.site_id",
        "routing.node_id",
        "routing.id_column",
        "routing.derived_fields",
        "routing.buckets",
        // [metadata]
        "metadata",
        "metadata.pipeline_version",
        "metadata.git_sha",
    ];
    keys.iter().copied().collect()
}

/// Tables whose children are free-form user keys.
const OPEN_TABLES: &[&str] = &["routing.derived_fields", "routing.buckets"];

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() && !OPEN_TABLES.contains(&path.as_str()) {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3. Ties go to the lexically smaller key
/// so the suggestion is stable across runs.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        // serde reports the parse error with a path later
        Err(_) => return Vec::new(),
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Range checks on a parsed config.
///
/// Returns (errors, warnings): errors must stop startup, warnings are logged.
pub fn validate_ranges(config: &super::PipelineConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let v = &config.validation;
    check_bounds(v.temperature_min, v.temperature_max, "validation.temperature", &mut errors);
    check_bounds(v.humidity_min, v.humidity_max, "validation.humidity", &mut errors);

    let r = &config.retry;
    if r.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if !(r.multiplier >= 1.0) {
        errors.push(format!(
            "retry.multiplier = {} must be >= 1.0 (delays may not shrink)",
            r.multiplier
        ));
    }
    if r.base_delay_ms > r.max_delay_ms {
        errors.push(format!(
            "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
            r.base_delay_ms, r.max_delay_ms
        ));
    }

    if config.sensor.batch_size == 0 {
        errors.push("sensor.batch_size must be > 0".to_string());
    }

    if config.state.busy_timeout_ms == 0 {
        warnings.push(ValidationWarning {
            field: "state.busy_timeout_ms".to_string(),
            message: "state.busy_timeout_ms = 0 makes every concurrent write hit the retry path"
                .to_string(),
            suggestion: None,
        });
    }

    if !(-100.0..=100.0).contains(&v.temperature_min) || !(-100.0..=100.0).contains(&v.temperature_max) {
        warnings.push(ValidationWarning {
            field: "validation.temperature".to_string(),
            message: format!(
                "temperature range [{}, {}] is outside the typical sensor range (-100 to 100)",
                v.temperature_min, v.temperature_max
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

fn check_bounds(min: f64, max: f64, name: &str, errors: &mut Vec<String>) {
    if min.is_nan() || max.is_nan() {
        errors.push(format!("{name} bounds must be numbers"));
    } else if min > max {
        errors.push(format!("{name}_min ({min}) must be <= {name}_max ({max})"));
    }
}
