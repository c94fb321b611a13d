//! Shared data structures for the phase-routed sensor pipeline
//!
//! - `Phase`, `Destination`, `Routing`: which mode is active and where its output lands
//! - `SensorRecord`, `TransformedRecord`, `ValidationOutcome`: records moving through the router
//! - `PhaseConfigRecord`, `ExecutionRecord`: rows of the phase configuration database

mod phase;
mod records;
mod state;

pub use phase::*;
pub use records::*;
pub use state::*;
