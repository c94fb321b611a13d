//! Phase router: transform, validate and split one batch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::metadata::{Clock, MetadataGenerator};
use super::transform::CanonicalTransform;
use super::validator::{RangeValidator, RecordValidator, SchemaValidator};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::types::{Phase, RoutedRecord, Routing, SensorRecord, ValidationOutcome};

/// Output of routing one batch. Input order is preserved inside each list.
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub phase: Phase,
    pub routing: Routing,
    pub valid: Vec<RoutedRecord>,
    pub invalid: Vec<ValidationOutcome>,
}

impl RouteResult {
    pub fn total(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }
}

pub struct PhaseRouter {
    transform: CanonicalTransform,
    metadata: MetadataGenerator,
    validator: Arc<dyn RecordValidator>,
}

impl std::fmt::Debug for PhaseRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRouter")
            .field("transform", &self.transform)
            .field("metadata", &self.metadata)
            .field("validator", &self.validator.name())
            .finish()
    }
}

impl PhaseRouter {
    /// Uses the configured schema file when one is set, the range policy
    /// otherwise.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let validator: Arc<dyn RecordValidator> = match &config.validation.schema_path {
            Some(path) => Arc::new(SchemaValidator::from_file(path)?),
            None => Arc::new(RangeValidator::from_config(&config.validation)),
        };
        Ok(Self {
            transform: CanonicalTransform::new(&config.routing),
            metadata: MetadataGenerator::new(config),
            validator,
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.metadata = self.metadata.with_clock(clock);
        self
    }

    pub fn validator_name(&self) -> &'static str {
        self.validator.name()
    }

    /// Routes a batch. Never drops a record: every input lands in exactly one
    /// of `valid` or `invalid`.
    pub fn route(&self, phase: &Phase, records: Vec<SensorRecord>) -> RouteResult {
        let routing = phase.routing();
        let count = records.len();

        let (valid, invalid) = match phase {
            Phase::Schematized => {
                let meta = self.metadata.generate(phase);
                let valid = records
                    .iter()
                    .map(|r| RoutedRecord::Transformed(self.transform.apply(r, &meta)))
                    .collect();
                (valid, Vec::new())
            }
            Phase::Validated => {
                let meta = self.metadata.generate(phase);
                let mut valid = Vec::with_capacity(count);
                let mut invalid = Vec::new();
                for record in &records {
                    let transformed = self.transform.apply(record, &meta);
                    match self.validator.validate(&transformed) {
                        Ok(()) => valid.push(RoutedRecord::Transformed(transformed)),
                        Err(violation) => {
                            debug!(
                                turbine_id = %transformed.turbine_id,
                                path = %violation.path,
                                "Record failed validation"
                            );
                            invalid.push(ValidationOutcome::invalid(
                                RoutedRecord::Transformed(transformed),
                                violation,
                            ));
                        }
                    }
                }
                (valid, invalid)
            }
            Phase::Unrecognized(name) => {
                warn!(phase = %name, destination = %routing, "Unrecognized phase, passing records through");
                (passthrough(records), Vec::new())
            }
            Phase::Raw | Phase::Aggregated | Phase::Anomaly | Phase::Enriched => {
                (passthrough(records), Vec::new())
            }
        };

        info!(
            phase = %phase,
            routing = %routing,
            records = count,
            valid = valid.len(),
            invalid = invalid.len(),
            "Routed batch"
        );

        RouteResult {
            phase: phase.clone(),
            routing,
            valid,
            invalid,
        }
    }
}

fn passthrough(records: Vec<SensorRecord>) -> Vec<RoutedRecord> {
    records.into_iter().map(RoutedRecord::Passthrough).collect()
}
