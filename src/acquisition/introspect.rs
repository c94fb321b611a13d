//! Sensor database introspection: table listing and per-table description.

use serde::Serialize;

use super::sensor_reader::{sensor_row, table_exists, SensorDataReader};
use crate::error::{PipelineError, Result};
use crate::types::SensorRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// Default expression as written in the DDL.
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: u64,
    pub sample_row: Option<SensorRecord>,
}

impl SensorDataReader {
    /// User tables, alphabetically. SQLite's internal tables are skipped.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                  WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                  ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
    }

    /// Columns, row count and one sample row of `table`.
    pub fn describe_table(&self, table: &str) -> Result<TableInfo> {
        self.validate_table(table)?;

        let info = self.with_connection(|conn| {
            if !table_exists(conn, table)? {
                return Ok(None);
            }

            let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        data_type: row.get(2)?,
                        nullable: row.get::<_, i64>(3)? == 0,
                        default: row.get(4)?,
                        primary_key: row.get::<_, i64>(5)? > 0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let row_count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))?;

            Ok(Some(TableInfo {
                table_name: table.to_string(),
                columns,
                row_count: u64::try_from(row_count).unwrap_or(0),
                sample_row: sensor_row(conn, table)?,
            }))
        })?;

        info.ok_or_else(|| {
            PipelineError::NotFound(format!("table '{table}' not found in sensor database"))
        })
    }
}
