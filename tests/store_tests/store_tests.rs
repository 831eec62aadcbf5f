//! Tests for the demo store
//!
//! These tests verify:
//! - Schema creation order and idempotence
//! - Seeding shape, failure and cancellation
//! - Exact and multi-key lookups, including paging
//! - Cursor failures surfacing when the cursor is closed
//! - Secondary key parsing and record encoding
//! - Row mapping rejecting rows of the wrong width or column types

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::MemoryStore;
use scylla::value::{CqlTimestamp, CqlValue, Row};
use widecol::cluster::{CancelToken, QueryContext};
use widecol::config::SchemaConfig;
use widecol::store::{
    PartitionQueryEngine, Record, SchemaInitializer, SecondaryKey, CLUSTER_COL_2,
    CLUSTER_VARIANTS, MAX_SEARCH_KEYS, PARTITION_KEY, PROJECTION_WIDTH,
};
use widecol::WidecolError;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store(page_size: usize) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_page_size(page_size))
}

fn initializer(store: &Arc<MemoryStore>) -> SchemaInitializer {
    SchemaInitializer::new(store.clone(), SchemaConfig::default())
}

fn engine(store: &Arc<MemoryStore>) -> PartitionQueryEngine {
    PartitionQueryEngine::new(store.clone(), &SchemaConfig::default())
}

fn seeded_store(ids: i64, page_size: usize) -> Arc<MemoryStore> {
    let store = setup_store(page_size);
    initializer(&store)
        .initialize(ids, &QueryContext::new())
        .unwrap();
    store
}

fn keys(ids: &[i64]) -> Vec<SecondaryKey> {
    ids.iter().copied().map(SecondaryKey::new).collect()
}

fn text(s: &str) -> Option<CqlValue> {
    Some(CqlValue::Text(s.to_string()))
}

/// A well-formed projection row for secondary id 1
fn demo_row() -> Row {
    Row {
        columns: vec![
            text("0000000000001"),
            text("FOO0"),
            text("BAR"),
            Some(CqlValue::Int(42)),
            Some(CqlValue::Boolean(true)),
            Some(CqlValue::Timestamp(CqlTimestamp(1_700_000_000_000))),
        ],
    }
}

fn assert_column_error<T: std::fmt::Debug>(result: Result<T, WidecolError>, needle: &str) {
    match result {
        Err(WidecolError::Column(msg)) => {
            assert!(msg.contains(needle), "'{}' does not mention '{}'", msg, needle)
        }
        other => panic!("Expected column error, got {:?}", other),
    }
}

// =============================================================================
// Schema Tests
// =============================================================================

#[test]
fn test_ensure_schema_creates_keyspace_then_table() {
    let store = setup_store(100);
    initializer(&store)
        .ensure_schema(&QueryContext::new())
        .unwrap();

    let executed = store.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].cql.starts_with("CREATE KEYSPACE IF NOT EXISTS demo"));
    assert!(executed[0].cql.contains("'replication_factor': 1"));
    assert!(executed[1].cql.starts_with("CREATE TABLE IF NOT EXISTS demo.demo"));
    assert!(executed.iter().all(|s| s.idempotent));
    assert_eq!(store.schema_waits(), 2);
    assert!(store.has_table("demo.demo"));
}

#[test]
fn test_table_definition() {
    let cql = initializer(&setup_store(1)).table_cql();
    assert!(cql.contains("PRIMARY KEY ((partitionId, secondaryId), clusterCol1, clusterCol2)"));
    assert!(cql.contains("dataCol3 timestamp"));
}

#[test]
fn test_configured_names_and_replication() {
    let store = setup_store(1);
    let config = SchemaConfig {
        keyspace: "bench".to_string(),
        table: "rows".to_string(),
        replication_factor: 3,
        ..SchemaConfig::default()
    };
    let init = SchemaInitializer::new(store.clone(), config);

    assert!(init.keyspace_cql().contains("'replication_factor': 3"));
    assert!(init.table_cql().contains("bench.rows"));
    assert!(init.insert_cql().starts_with("INSERT INTO bench.rows"));
}

#[test]
fn test_initialize_twice_is_harmless() {
    let store = seeded_store(4, 100);
    initializer(&store)
        .initialize(4, &QueryContext::new())
        .unwrap();

    assert_eq!(store.row_count(), 8);
}

#[test]
fn test_schema_failure_is_wrapped() {
    let store = setup_store(1);
    store.set_unreachable(true);

    match initializer(&store).ensure_schema(&QueryContext::new()) {
        Err(WidecolError::Schema(msg)) => assert!(msg.starts_with("creating keyspace")),
        other => panic!("Expected schema error, got {:?}", other),
    }
}

// =============================================================================
// Seed Tests
// =============================================================================

#[test]
fn test_seed_writes_two_rows_per_id() {
    let store = seeded_store(5, 100);
    let rows = store.rows();

    assert_eq!(rows.len(), 10);
    for row in &rows {
        assert_eq!(row.partition_id, PARTITION_KEY);
        assert_eq!(row.secondary_id.len(), 13);
        assert!(CLUSTER_VARIANTS.contains(&row.cluster_col_1.as_str()));
        assert_eq!(row.cluster_col_2, CLUSTER_COL_2);
        assert!((0..100).contains(&row.data_col_1));
    }
    assert!(rows.iter().any(|r| r.secondary_id == "0000000000004"));
    assert!(!rows.iter().any(|r| r.secondary_id == "0000000000005"));
}

#[test]
fn test_seed_report() {
    let store = setup_store(100);
    let init = initializer(&store);
    init.ensure_schema(&QueryContext::new()).unwrap();

    let report = init.seed(7, &QueryContext::new()).unwrap();
    assert_eq!(report.rows_written, 14);
}

#[test]
fn test_seed_inserts_bind_partition_key_and_are_not_idempotent() {
    let store = seeded_store(1, 100);
    let inserts: Vec<_> = store
        .executed()
        .into_iter()
        .filter(|s| s.cql.starts_with("INSERT"))
        .collect();

    assert_eq!(inserts.len(), 2);
    for insert in &inserts {
        assert!(!insert.idempotent);
        assert_eq!(insert.values.len(), 7);
        assert_eq!(insert.values[0], CqlValue::Text(PARTITION_KEY.to_string()));
        assert_eq!(insert.values[1], CqlValue::Text("0000000000000".to_string()));
        assert!(matches!(insert.values[4], CqlValue::Int(_)));
        assert!(matches!(insert.values[5], CqlValue::Boolean(_)));
        assert!(matches!(insert.values[6], CqlValue::Timestamp(_)));
    }
    assert_eq!(inserts[0].values[..2], inserts[1].values[..2]);
}

#[test]
fn test_seed_nothing_for_zero_or_negative() {
    let store = seeded_store(0, 100);
    assert_eq!(store.row_count(), 0);

    let report = initializer(&store).seed(-3, &QueryContext::new()).unwrap();
    assert_eq!(report.rows_written, 0);
    assert_eq!(store.row_count(), 0);
}

#[test]
fn test_seed_stops_at_first_failure() {
    let store = setup_store(100);
    let init = initializer(&store);
    init.ensure_schema(&QueryContext::new()).unwrap();
    store.fail_inserts_after(3);

    match init.seed(10, &QueryContext::new()) {
        Err(WidecolError::Database { message, transient }) => {
            assert!(message.contains("timed out"));
            assert!(transient);
        }
        other => panic!("Expected write timeout, got {:?}", other),
    }
    assert_eq!(store.row_count(), 3);
}

#[test]
fn test_seed_cancelled() {
    let store = setup_store(100);
    let token = CancelToken::new();
    token.cancel();

    let result = initializer(&store).initialize(10, &QueryContext::new().cancel_token(token));
    assert!(matches!(result, Err(WidecolError::Cancelled)));
    assert_eq!(store.row_count(), 0);
}

// =============================================================================
// Find Tests
// =============================================================================

#[test]
fn test_find_returns_both_clustering_rows() {
    let store = seeded_store(5, 100);
    let records = engine(&store)
        .find_by_id(&SecondaryKey::new(3), &QueryContext::new())
        .unwrap();

    assert_eq!(records.len(), 2);
    let mut variants: Vec<&str> = records.iter().map(|r| r.cluster_col_1.as_str()).collect();
    variants.sort();
    assert_eq!(variants, vec!["FOO0", "FOO1"]);
    for record in &records {
        assert_eq!(record.partition_id, "P1");
        assert_eq!(record.secondary_id, "0000000000003");
        assert_eq!(record.cluster_col_2, "BAR");
        assert!(record.data_col_2.is_some());
        assert!(record.data_col_3.is_some());
    }
}

#[test]
fn test_find_unknown_id_is_empty() {
    let store = seeded_store(5, 100);
    let records = engine(&store)
        .find_by_id(&SecondaryKey::new(999), &QueryContext::new())
        .unwrap();
    assert!(records.is_empty());
}

#[test]
fn test_find_statement_binds_full_partition_key() {
    let store = seeded_store(1, 100);
    engine(&store)
        .find_by_id(&SecondaryKey::new(0), &QueryContext::new())
        .unwrap();

    let find = store.executed().pop().unwrap();
    assert!(find.cql.contains("partitionId = ? AND secondaryId = ?"));
    assert!(find.idempotent);
    assert_eq!(
        find.values,
        vec![
            CqlValue::Text("P1".to_string()),
            CqlValue::Text("0000000000000".to_string())
        ]
    );
}

#[test]
fn test_find_with_unreachable_store() {
    let store = seeded_store(1, 100);
    store.set_unreachable(true);

    let result = engine(&store).find_by_id(&SecondaryKey::new(0), &QueryContext::new());
    assert!(matches!(result, Err(WidecolError::NoHostsAvailable(_))));
}

// =============================================================================
// Search Tests
// =============================================================================

#[test]
fn test_search_returns_summary_records() {
    let store = seeded_store(5, 100);
    let records = engine(&store)
        .search(&keys(&[1, 2, 999]), &QueryContext::new())
        .unwrap();

    assert_eq!(records.len(), 4);
    for record in &records {
        assert!(record.data_col_2.is_none());
        assert!(record.data_col_3.is_none());
    }
    assert!(records.iter().all(|r| r.secondary_id == "0000000000001"
        || r.secondary_id == "0000000000002"));
}

#[test]
fn test_search_statement_shape() {
    let store = seeded_store(1, 100);
    engine(&store)
        .search(&keys(&[0, 1, 2]), &QueryContext::new())
        .unwrap();

    let search = store.executed().pop().unwrap();
    assert!(search.cql.ends_with("secondaryId IN (?, ?, ?)"));
    assert!(search.idempotent);
    assert_eq!(search.values.len(), 4);
}

#[test]
fn test_search_empty_keys_sends_nothing() {
    let store = seeded_store(1, 100);
    let before = store.executed().len();

    let records = engine(&store).search(&[], &QueryContext::new()).unwrap();
    assert!(records.is_empty());
    assert_eq!(store.executed().len(), before);
}

#[test]
fn test_search_too_many_keys() {
    let store = seeded_store(1, 100);
    let before = store.executed().len();
    let too_many: Vec<i64> = (0..=MAX_SEARCH_KEYS as i64).collect();

    let result = engine(&store).search(&keys(&too_many), &QueryContext::new());
    assert!(matches!(result, Err(WidecolError::InvalidArgument(_))));
    assert_eq!(store.executed().len(), before);
}

#[test]
fn test_search_across_pages() {
    let store = seeded_store(10, 3);
    let pages_before = store.pages_served();
    let all: Vec<i64> = (0..10).collect();

    let records = engine(&store)
        .search(&keys(&all), &QueryContext::new())
        .unwrap();

    assert_eq!(records.len(), 20);
    assert_eq!(store.pages_served() - pages_before, 7);
}

#[test]
fn test_page_failure_surfaces_at_close() {
    let store = seeded_store(5, 2);
    store.fail_on_page(2);
    let all: Vec<i64> = (0..5).collect();

    match engine(&store).search(&keys(&all), &QueryContext::new()) {
        Err(WidecolError::Database { message, transient }) => {
            assert!(message.contains("failures"));
            assert!(!transient);
        }
        other => panic!("Expected read failure, got {:?}", other),
    }
}

#[test]
fn test_expired_deadline_fails_lookup() {
    let store = seeded_store(1, 100);
    let ctx = QueryContext::with_timeout(std::time::Duration::ZERO);

    let result = engine(&store).find_by_id(&SecondaryKey::new(0), &ctx);
    assert!(matches!(result, Err(WidecolError::DeadlineExceeded)));
}

#[test]
fn test_random_search_keys() {
    let keys = PartitionQueryEngine::random_search_keys(10);
    assert_eq!(keys.len(), 10);
    for key in &keys {
        assert_eq!(key.as_str().len(), 13);
        assert!(key.as_str().parse::<i64>().unwrap() < 1000);
    }
}

// =============================================================================
// Secondary Key Tests
// =============================================================================

#[test]
fn test_secondary_key_padding() {
    assert_eq!(SecondaryKey::new(42).as_str(), "0000000000042");
    assert_eq!(SecondaryKey::default().as_str(), "0000000000000");
    assert_eq!(SecondaryKey::new(7).to_string(), "0000000000007");
}

#[test]
fn test_parse_or_default() {
    assert_eq!(SecondaryKey::parse_or_default(Some("12")), SecondaryKey::new(12));
    assert_eq!(SecondaryKey::parse_or_default(Some("abc")), SecondaryKey::default());
    assert_eq!(SecondaryKey::parse_or_default(None), SecondaryKey::default());
}

#[test]
fn test_parse_list() {
    assert_eq!(
        SecondaryKey::parse_list("1, 2,,3").unwrap(),
        keys(&[1, 2, 3])
    );
    assert!(matches!(
        SecondaryKey::parse_list("1,x"),
        Err(WidecolError::InvalidArgument(_))
    ));
    assert!(matches!(
        SecondaryKey::parse_list(" , "),
        Err(WidecolError::InvalidArgument(_))
    ));

    let too_many = (0..=MAX_SEARCH_KEYS)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    assert!(SecondaryKey::parse_list(&too_many).is_err());
}

// =============================================================================
// Record Tests
// =============================================================================

#[test]
fn test_summary_record_json_omits_payload_columns() {
    let record = Record {
        partition_id: "P1".to_string(),
        secondary_id: "0000000000001".to_string(),
        cluster_col_1: "FOO0".to_string(),
        cluster_col_2: "BAR".to_string(),
        data_col_1: 12,
        data_col_2: None,
        data_col_3: None,
    };

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["partition_id"], "P1");
    assert_eq!(json["secondary_id"], "0000000000001");
    assert_eq!(json["data_col_1"], 12);
    assert!(json.get("data_col_2").is_none());
    assert!(json.get("data_col_3").is_none());
}

#[test]
fn test_full_record_from_row() {
    let record = Record::from_row(&demo_row(), true).unwrap();

    assert_eq!(record.partition_id, PARTITION_KEY);
    assert_eq!(record.secondary_id, "0000000000001");
    assert_eq!(record.cluster_col_1, "FOO0");
    assert_eq!(record.cluster_col_2, "BAR");
    assert_eq!(record.data_col_1, 42);
    assert_eq!(record.data_col_2, Some(true));
    assert_eq!(
        record.data_col_3,
        Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
    );
}

#[test]
fn test_summary_record_from_row() {
    let record = Record::from_row(&demo_row(), false).unwrap();
    assert_eq!(record.data_col_1, 42);
    assert!(record.data_col_2.is_none());
    assert!(record.data_col_3.is_none());
}

#[test]
fn test_null_columns_read_as_zero_values() {
    let row = Row {
        columns: vec![None; PROJECTION_WIDTH],
    };
    let record = Record::from_row(&row, true).unwrap();

    assert_eq!(record.secondary_id, "");
    assert_eq!(record.data_col_1, 0);
    assert_eq!(record.data_col_2, Some(false));
    assert!(record.data_col_3.is_none());
}

// =============================================================================
// Malformed Row Tests
// =============================================================================

#[test]
fn test_row_shorter_than_projection() {
    let mut row = demo_row();
    row.columns.truncate(3);
    assert_column_error(Record::from_row(&row, true), "expected 6 columns, got 3");

    let empty = Row { columns: Vec::new() };
    assert_column_error(Record::from_row(&empty, false), "got 0");
}

#[test]
fn test_row_wider_than_projection() {
    let mut row = demo_row();
    row.columns.push(text("extra"));
    assert_column_error(Record::from_row(&row, true), "got 7");

    // A row claiming far more columns than the projection is rejected
    // up front, before any column is looked at
    let huge = Row {
        columns: vec![None; 100_000],
    };
    assert_column_error(Record::from_row(&huge, true), "got 100000");
}

#[test]
fn test_column_of_wrong_type() {
    let mut row = demo_row();
    row.columns[3] = text("forty-two");
    assert_column_error(Record::from_row(&row, false), "dataCol1 should be int");

    let mut row = demo_row();
    row.columns[0] = Some(CqlValue::Int(1));
    assert_column_error(Record::from_row(&row, false), "secondaryId should be text");
}

#[test]
fn test_dropped_column_is_still_type_checked() {
    let mut row = demo_row();
    row.columns[4] = Some(CqlValue::Int(1));
    assert_column_error(Record::from_row(&row, false), "dataCol2 should be boolean");
}

#[test]
fn test_timestamp_out_of_range() {
    let mut row = demo_row();
    row.columns[5] = Some(CqlValue::Timestamp(CqlTimestamp(i64::MAX)));
    assert_column_error(Record::from_row(&row, true), "out of range");

    let mut row = demo_row();
    row.columns[5] = Some(CqlValue::Timestamp(CqlTimestamp(i64::MIN)));
    assert_column_error(Record::from_row(&row, true), "out of range");
}

#[test]
fn test_malformed_row_fails_lookup() {
    let store = seeded_store(2, 100);
    let mut row = demo_row();
    row.columns.truncate(2);
    store.inject_row(row);

    let result = engine(&store).find_by_id(&SecondaryKey::new(1), &QueryContext::new());
    assert_column_error(result, "expected 6 columns");
}

#[test]
fn test_malformed_row_on_later_page_fails_search() {
    let store = seeded_store(4, 2);
    let pages_before = store.pages_served();
    let mut row = demo_row();
    row.columns[2] = Some(CqlValue::Boolean(false));

    // Served at the end of the first page; the cursor stops there
    store.inject_row(row);
    let result = engine(&store).search(&keys(&[0, 1, 2, 3]), &QueryContext::new());

    assert_column_error(result, "clusterCol2 should be text");
    assert_eq!(store.pages_served() - pages_before, 1);
}
