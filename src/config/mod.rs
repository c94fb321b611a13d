//! Pipeline Configuration Module
//!
//! Configuration is loaded from TOML and handed to each component at
//! construction. Nothing here is global.
//!
//! ## Loading Order
//!
//! 1. `PIPELINE_CONFIG` environment variable (path to TOML file)
//! 2. `pipeline.toml` in the current working directory
//! 3. Built-in defaults
//!
//! A missing file falls through to the next source. A file that is present
//! but malformed is an error. Environment overrides (`PIPELINE_TYPE`,
//! `PIPELINE_CONFIG_DB`, `SENSOR_DB`, `PIPELINE_VERSION`, `NODE_ID`) are
//! applied last.
//!
//! ```ignore
//! let config = PipelineConfig::load()?;
//! let store = PhaseStateStore::open(config.state.clone(), config.retry.clone())?;
//! ```

mod pipeline_config;
pub mod defaults;
pub mod validation;

pub use pipeline_config::*;
