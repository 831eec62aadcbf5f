//! Store Module
//!
//! The demo dataset on top of the cluster session: schema creation and
//! seeding, and the two partition lookups.

mod model;
mod query;
mod schema;

pub use model::{
    Record, SecondaryKey, SeedReport, CLUSTER_COL_2, CLUSTER_VARIANTS, MAX_SEARCH_KEYS,
    PARTITION_KEY, PROJECTION, PROJECTION_WIDTH,
};
pub use query::{PartitionQueryEngine, DEFAULT_SEARCH_KEYS, RANDOM_KEY_SPACE};
pub use schema::SchemaInitializer;
