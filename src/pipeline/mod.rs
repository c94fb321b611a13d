//! Phase Routing Pipeline
//!
//! ```text
//! SensorRecord batch
//!   -> PhaseRouter::route(phase)
//!        raw / aggregated / anomaly / enriched / unrecognized : pass-through
//!        schematized : canonical transform + metadata
//!        validated   : canonical transform + metadata + validator (SPLIT)
//!   -> RouteResult::deliver(uploader)
//! ```
//!
//! Records are never dropped. A phase this build does not know lands in the
//! ingestion zone untouched.

mod delivery;
pub mod metadata;
mod router;
pub mod transform;
pub mod validator;

pub use delivery::Uploader;
pub use metadata::{Clock, FixedClock, MetadataGenerator, SystemClock};
pub use router::{PhaseRouter, RouteResult};
pub use transform::CanonicalTransform;
pub use validator::{FieldRange, RangeValidator, RecordValidator, SchemaValidator};
