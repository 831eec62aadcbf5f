//! Demo data model

use std::fmt;

use chrono::{DateTime, Utc};
use scylla::value::{CqlValue, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WidecolError};

/// The single partition the demo workload writes to and reads from
pub const PARTITION_KEY: &str = "P1";

/// `clusterCol1` values seeded for every secondary id
pub const CLUSTER_VARIANTS: [&str; 2] = ["FOO0", "FOO1"];

/// `clusterCol2` value of every seeded row
pub const CLUSTER_COL_2: &str = "BAR";

/// Most keys accepted by one search
pub const MAX_SEARCH_KEYS: usize = 100;

/// Columns read by both lookups, in row order
pub const PROJECTION: &str = "secondaryId, clusterCol1, clusterCol2, dataCol1, dataCol2, dataCol3";

/// Number of columns in [`PROJECTION`]
pub const PROJECTION_WIDTH: usize = 6;

const KEY_WIDTH: usize = 13;

/// Second partition key component: a decimal rendered 13 characters wide
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecondaryKey(String);

impl SecondaryKey {
    /// Zero-padded key for `n`; negative ids keep their sign in front
    pub fn new(n: i64) -> Self {
        Self(format!("{:0width$}", n, width = KEY_WIDTH))
    }

    /// Parse a decimal id; anything absent or non-numeric is the default key
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse::<i64>().ok())
            .map(Self::new)
            .unwrap_or_default()
    }

    /// Parse a comma-separated id list such as `1,42,7`
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        let keys = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i64>().map(Self::new).map_err(|_| {
                    WidecolError::InvalidArgument(format!("'{}' is not an integer id", part))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if keys.is_empty() {
            return Err(WidecolError::InvalidArgument(
                "ids must contain at least one id".to_string(),
            ));
        }
        if keys.len() > MAX_SEARCH_KEYS {
            return Err(WidecolError::InvalidArgument(format!(
                "at most {} ids per search, got {}",
                MAX_SEARCH_KEYS,
                keys.len()
            )));
        }
        Ok(keys)
    }

    /// The key exactly as stored in `secondaryId`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SecondaryKey {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Display for SecondaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row as returned to HTTP clients
///
/// Summary records (from search) leave out `data_col_2` and `data_col_3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Always [`PARTITION_KEY`]; the lookups never read it back
    pub partition_id: String,
    pub secondary_id: String,
    pub cluster_col_1: String,
    pub cluster_col_2: String,
    pub data_col_1: i32,
    /// Only set on records returned by `find`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_col_2: Option<bool>,
    /// Only set on records returned by `find`, and only when not null
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_col_3: Option<DateTime<Utc>>,
}

impl Record {
    /// Map a row read with [`PROJECTION`]
    ///
    /// Nulls read as the zero value of their column, except a null
    /// `dataCol3` which stays absent. A row of the wrong width, or with a
    /// column of the wrong type, is a `Column` error.
    pub fn from_row(row: &Row, full: bool) -> Result<Self> {
        if row.columns.len() != PROJECTION_WIDTH {
            return Err(WidecolError::Column(format!(
                "expected {} columns, got {}",
                PROJECTION_WIDTH,
                row.columns.len()
            )));
        }
        let secondary_id = text(row, 0, "secondaryId")?;
        let cluster_col_1 = text(row, 1, "clusterCol1")?;
        let cluster_col_2 = text(row, 2, "clusterCol2")?;
        let data_col_1 = int(row, 3, "dataCol1")?;
        // Read even when dropped so a type mismatch still surfaces
        let data_col_2 = boolean(row, 4, "dataCol2")?;
        let data_col_3 = timestamp(row, 5, "dataCol3")?;

        Ok(Self {
            partition_id: PARTITION_KEY.to_string(),
            secondary_id: secondary_id.unwrap_or_default(),
            cluster_col_1: cluster_col_1.unwrap_or_default(),
            cluster_col_2: cluster_col_2.unwrap_or_default(),
            data_col_1: data_col_1.unwrap_or_default(),
            data_col_2: full.then(|| data_col_2.unwrap_or_default()),
            data_col_3: data_col_3.filter(|_| full),
        })
    }
}

// =============================================================================
// Column Access
// =============================================================================

fn column<'r>(row: &'r Row, index: usize, name: &str) -> Result<Option<&'r CqlValue>> {
    row.columns
        .get(index)
        .map(Option::as_ref)
        .ok_or_else(|| WidecolError::Column(format!("missing column {} ({})", index, name)))
}

fn mismatch(name: &str, expected: &str, found: &CqlValue) -> WidecolError {
    WidecolError::Column(format!(
        "column {} should be {}, found {:?}",
        name, expected, found
    ))
}

fn text(row: &Row, index: usize, name: &str) -> Result<Option<String>> {
    match column(row, index, name)? {
        None => Ok(None),
        Some(CqlValue::Text(s)) | Some(CqlValue::Ascii(s)) => Ok(Some(s.clone())),
        Some(other) => Err(mismatch(name, "text", other)),
    }
}

fn int(row: &Row, index: usize, name: &str) -> Result<Option<i32>> {
    match column(row, index, name)? {
        None => Ok(None),
        Some(CqlValue::Int(n)) => Ok(Some(*n)),
        Some(other) => Err(mismatch(name, "int", other)),
    }
}

fn boolean(row: &Row, index: usize, name: &str) -> Result<Option<bool>> {
    match column(row, index, name)? {
        None => Ok(None),
        Some(CqlValue::Boolean(b)) => Ok(Some(*b)),
        Some(other) => Err(mismatch(name, "boolean", other)),
    }
}

fn timestamp(row: &Row, index: usize, name: &str) -> Result<Option<DateTime<Utc>>> {
    match column(row, index, name)? {
        None => Ok(None),
        Some(CqlValue::Timestamp(ts)) => DateTime::from_timestamp_millis(ts.0)
            .map(Some)
            .ok_or_else(|| {
                WidecolError::Column(format!("column {} is out of range: {}ms", name, ts.0))
            }),
        Some(other) => Err(mismatch(name, "timestamp", other)),
    }
}

/// Outcome of a seed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    /// Rows inserted, two per secondary id
    pub rows_written: u64,
    pub elapsed: std::time::Duration,
}
