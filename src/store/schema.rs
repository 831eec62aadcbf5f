//! Schema Initializer
//!
//! Creates the demo keyspace and table when missing and bulk-loads
//! synthetic rows into the demo partition.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::Rng;

use super::model::{SecondaryKey, SeedReport, CLUSTER_COL_2, CLUSTER_VARIANTS, PARTITION_KEY};
use crate::cluster::{Executor, QueryContext, Statement};
use crate::config::SchemaConfig;
use crate::error::{Result, WidecolError};

/// Progress is logged every this many secondary ids
const PROGRESS_EVERY: i64 = 1000;

/// Creates and fills the demo keyspace and table
pub struct SchemaInitializer {
    /// Session (or test fake) the DDL and inserts run on
    executor: Arc<dyn Executor>,
    /// Names, replication factor and default row count
    config: SchemaConfig,
}

impl SchemaInitializer {
    /// Initializer for the keyspace and table named in `config`
    pub fn new(executor: Arc<dyn Executor>, config: SchemaConfig) -> Self {
        Self { executor, config }
    }

    /// `CREATE KEYSPACE IF NOT EXISTS` with SimpleStrategy replication
    pub fn keyspace_cql(&self) -> String {
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
             {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
            self.config.keyspace, self.config.replication_factor
        )
    }

    /// `CREATE TABLE IF NOT EXISTS`, keyed by `(partitionId, secondaryId)`
    /// and clustered by the two cluster columns
    pub fn table_cql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (\
             partitionId text, \
             secondaryId text, \
             clusterCol1 text, \
             clusterCol2 text, \
             dataCol1 int, \
             dataCol2 boolean, \
             dataCol3 timestamp, \
             PRIMARY KEY ((partitionId, secondaryId), clusterCol1, clusterCol2))",
            self.config.keyspace, self.config.table
        )
    }

    /// Insert of one full row, seven bound values
    pub fn insert_cql(&self) -> String {
        format!(
            "INSERT INTO {}.{} (partitionId, secondaryId, clusterCol1, clusterCol2, \
             dataCol1, dataCol2, dataCol3) VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.config.keyspace, self.config.table
        )
    }

    /// Create the keyspace and table if they do not exist yet
    pub fn ensure_schema(&self, ctx: &QueryContext) -> Result<()> {
        tracing::info!("Initializing keyspace '{}'", self.config.keyspace);
        self.create(self.keyspace_cql(), "keyspace", ctx)?;

        tracing::info!(
            "Initializing table '{}.{}'",
            self.config.keyspace,
            self.config.table
        );
        self.create(self.table_cql(), "table", ctx)
    }

    fn create(&self, cql: String, what: &str, ctx: &QueryContext) -> Result<()> {
        let statement = Statement::new(cql).idempotent(true).context(ctx.clone());
        self.executor
            .execute(&statement)
            .and_then(|_| self.executor.await_schema_agreement())
            .map_err(|e| match e {
                WidecolError::Cancelled | WidecolError::DeadlineExceeded => e,
                e => WidecolError::Schema(format!("creating {}: {}", what, e)),
            })
    }

    /// Insert `rows x 2` rows; zero or negative `rows` inserts nothing
    ///
    /// Inserts run one at a time, each prepared and routed to a replica of
    /// its partition, and are never retried. The first failure aborts the run.
    pub fn seed(&self, rows: i64, ctx: &QueryContext) -> Result<SeedReport> {
        let started = Instant::now();
        let insert = self.insert_cql();
        let mut rng = rand::thread_rng();
        let mut written = 0u64;

        tracing::info!(
            "Seeding {} x {} rows",
            rows.max(0),
            CLUSTER_VARIANTS.len()
        );

        for i in 0..rows.max(0) {
            let key = SecondaryKey::new(i);
            for variant in CLUSTER_VARIANTS {
                let statement = Statement::new(insert.clone())
                    .bind(PARTITION_KEY)
                    .bind(key.as_str())
                    .bind(variant)
                    .bind(CLUSTER_COL_2)
                    .bind(rng.gen_range(0..100i32))
                    .bind(rng.gen::<bool>())
                    .bind(Utc::now())
                    .idempotent(false)
                    .context(ctx.clone());

                self.executor.execute(&statement).map_err(|e| {
                    tracing::error!("Insert of {}/{} failed: {}", key, variant, e);
                    e
                })?;
                written += 1;
            }
            if (i + 1) % PROGRESS_EVERY == 0 {
                tracing::debug!("Seeded {} of {} secondary ids", i + 1, rows);
            }
        }

        let report = SeedReport {
            rows_written: written,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Seeded {} rows in {:?}",
            report.rows_written,
            report.elapsed
        );
        Ok(report)
    }

    /// Ensure the schema, then seed
    pub fn initialize(&self, rows: i64, ctx: &QueryContext) -> Result<SeedReport> {
        self.ensure_schema(ctx)?;
        self.seed(rows, ctx)
    }
}
