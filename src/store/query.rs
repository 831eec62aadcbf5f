//! Partition Query Engine
//!
//! The two read shapes of the demo, both pinned to the demo partition:
//!
//! - search: `partitionId = ? AND secondaryId IN (?, ...)`, summary records
//! - find:   `partitionId = ? AND secondaryId = ?`, full records
//!
//! Rows are streamed through a [`RowIter`]; a page fetch failure is only
//! known once the cursor is closed, so the cursor is always drained and
//! closed before a result is reported.

use std::sync::Arc;

use rand::Rng;

use super::model::{Record, SecondaryKey, MAX_SEARCH_KEYS, PARTITION_KEY, PROJECTION};
use crate::cluster::{Executor, QueryContext, RowIter, Statement};
use crate::config::SchemaConfig;
use crate::error::{Result, WidecolError};

/// Keys used by a search that names none
pub const DEFAULT_SEARCH_KEYS: usize = 10;

/// Random search keys are drawn from `0..RANDOM_KEY_SPACE`
pub const RANDOM_KEY_SPACE: i64 = 1000;

/// Reads the demo partition through an [`Executor`]
///
/// Cheap to share; every call builds its own statement and cursor.
pub struct PartitionQueryEngine {
    /// Session (or test fake) the reads run on
    executor: Arc<dyn Executor>,
    /// Keyspace holding the demo table
    keyspace: String,
    /// Demo table name
    table: String,
}

impl PartitionQueryEngine {
    /// Engine over `config.keyspace`.`config.table`
    ///
    /// Nothing is sent to the cluster until the first lookup.
    pub fn new(executor: Arc<dyn Executor>, config: &SchemaConfig) -> Self {
        Self {
            executor,
            keyspace: config.keyspace.clone(),
            table: config.table.clone(),
        }
    }

    /// `count` random keys in `0..1000`
    pub fn random_search_keys(count: usize) -> Vec<SecondaryKey> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| SecondaryKey::new(rng.gen_range(0..RANDOM_KEY_SPACE)))
            .collect()
    }

    /// Search statement text with one `?` per key
    pub fn search_cql(&self, key_count: usize) -> String {
        let placeholders = vec!["?"; key_count].join(", ");
        format!(
            "SELECT {} FROM {}.{} WHERE partitionId = ? AND secondaryId IN ({})",
            PROJECTION, self.keyspace, self.table, placeholders
        )
    }

    /// Single-key lookup statement text
    pub fn find_cql(&self) -> String {
        format!(
            "SELECT {} FROM {}.{} WHERE partitionId = ? AND secondaryId = ?",
            PROJECTION, self.keyspace, self.table
        )
    }

    /// Summary records for every row whose secondary id is in `keys`
    ///
    /// More than [`MAX_SEARCH_KEYS`] keys is an `InvalidArgument` error and
    /// no key at all returns nothing without touching the cluster.
    pub fn search(&self, keys: &[SecondaryKey], ctx: &QueryContext) -> Result<Vec<Record>> {
        if keys.len() > MAX_SEARCH_KEYS {
            return Err(WidecolError::InvalidArgument(format!(
                "at most {} keys per search, got {}",
                MAX_SEARCH_KEYS,
                keys.len()
            )));
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // The keys span partitions, so the driver has no single replica to prefer
        let statement = keys
            .iter()
            .fold(
                Statement::new(self.search_cql(keys.len())).bind(PARTITION_KEY),
                |statement, key| statement.bind(key.as_str()),
            )
            .idempotent(true)
            .context(ctx.clone());

        tracing::debug!("Searching {} key(s)", keys.len());
        self.collect(statement, false)
    }

    /// Full records for every clustering row of one secondary id
    ///
    /// Both partition key components are bound, so the prepared statement
    /// is routed to a replica of that partition.
    pub fn find_by_id(&self, key: &SecondaryKey, ctx: &QueryContext) -> Result<Vec<Record>> {
        let statement = Statement::new(self.find_cql())
            .bind(PARTITION_KEY)
            .bind(key.as_str())
            .idempotent(true)
            .context(ctx.clone());

        tracing::debug!("Finding secondary id {}", key);
        self.collect(statement, true)
    }

    fn collect(&self, statement: Statement, full: bool) -> Result<Vec<Record>> {
        let mut rows = RowIter::new(self.executor.as_ref(), statement);
        let mut records = Vec::new();
        let mut mapping_error = None;

        for row in rows.by_ref() {
            match Record::from_row(&row, full) {
                Ok(record) => records.push(record),
                Err(e) => {
                    mapping_error = Some(e);
                    break;
                }
            }
        }

        let result = rows.close().and_then(|_| match mapping_error {
            Some(e) => Err(e),
            None => Ok(records),
        });
        if let Err(e) = &result {
            tracing::warn!("Partition query failed: {}", e);
        }
        result
    }
}
