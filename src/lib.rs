//! Sensor Phase Pipeline
//!
//! Phase-controlled routing of turbine sensor readings.
//!
//! ## Architecture
//!
//! - **PhaseStateStore**: durable, single-active phase selection with audit history
//! - **SensorDataReader**: read-only, paginated access to the sensor database
//! - **PhaseRouter**: per-phase transform, validation and destination split
//! - **MetadataGenerator**: audit stamps with a value-free transformation hash

pub mod acquisition;
pub mod backoff;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{PipelineConfig, SensorConfig, StoreConfig};

// Re-export error handling
pub use error::{PipelineError, Result};

// Re-export commonly used types
pub use types::{
    Destination, ExecutionRecord, Phase, PhaseConfigRecord, PhaseSource, PipelineMetadata,
    RoutedRecord, Routing, SensorRecord, TransformedRecord, ValidationOutcome, Violation,
};

// Re-export the core components
pub use acquisition::{ReadOptions, SensorDataReader};
pub use backoff::BackoffPolicy;
pub use pipeline::{MetadataGenerator, PhaseRouter, RecordValidator, RouteResult, Uploader};
pub use storage::PhaseStateStore;
