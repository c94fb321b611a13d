//! Hand-off of routed batches to object storage.

use serde_json::Value;
use tracing::info;

use super::router::RouteResult;
use crate::config::RoutingConfig;
use crate::error::{PipelineError, Result};
use crate::types::Destination;

/// Uploads one batch to a bucket and returns its location identifier.
pub trait Uploader: Send + Sync {
    fn upload(&self, bucket: &str, records: Vec<Value>) -> Result<String>;
}

impl RouteResult {
    /// Uploads the valid list and, for split phases, the invalid list.
    ///
    /// Empty lists are skipped. Returns the locations in upload order, ready
    /// for `record_execution`.
    pub fn deliver(&self, uploader: &dyn Uploader, routing: &RoutingConfig) -> Result<Vec<String>> {
        let mut locations = Vec::with_capacity(2);

        if !self.valid.is_empty() {
            let records = self.valid.iter().map(|r| r.to_value()).collect();
            locations.push(send(uploader, routing, self.routing.primary(), records)?);
        }

        if !self.invalid.is_empty() {
            // Non-split phases never fill the invalid list.
            let destination = self.routing.rejects().ok_or_else(|| {
                PipelineError::Validation(format!(
                    "phase '{}' produced invalid records but has no reject destination",
                    self.phase
                ))
            })?;
            let records = self.invalid.iter().map(|o| o.to_value()).collect();
            locations.push(send(uploader, routing, destination, records)?);
        }

        Ok(locations)
    }
}

fn send(
    uploader: &dyn Uploader,
    routing: &RoutingConfig,
    destination: Destination,
    records: Vec<Value>,
) -> Result<String> {
    let bucket = routing.bucket_for(destination);
    let count = records.len();
    let location = uploader.upload(&bucket, records)?;
    info!(destination = %destination, bucket = %bucket, records = count, location = %location, "Delivered batch");
    Ok(location)
}
