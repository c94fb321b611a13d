//! Sensor data acquisition module
//!
//! Read-only access to the sensor database produced by the field collectors.

mod introspect;
mod sensor_reader;

pub use introspect::{ColumnInfo, TableInfo};
pub use sensor_reader::{ReadOptions, SensorDataReader, SensorStream};
