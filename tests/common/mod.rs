//! Shared test helpers
//!
//! - `MemoryStore`: an in-memory `Executor` understanding the demo's
//!   statements, with failure injection
//! - `closed_port_addr`: an address nothing listens on

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::net::{SocketAddr, TcpListener};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scylla::value::{CqlTimestamp, CqlValue, Row};

use widecol::cluster::{Executor, PageSource, Statement};
use widecol::{Result, WidecolError};

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoredRow {
    pub partition_id: String,
    pub secondary_id: String,
    pub cluster_col_1: String,
    pub cluster_col_2: String,
    pub data_col_1: i32,
    pub data_col_2: bool,
    pub data_col_3: DateTime<Utc>,
}

impl StoredRow {
    /// The row as read with the demo projection
    fn to_row(&self) -> Row {
        Row {
            columns: vec![
                Some(CqlValue::Text(self.secondary_id.clone())),
                Some(CqlValue::Text(self.cluster_col_1.clone())),
                Some(CqlValue::Text(self.cluster_col_2.clone())),
                Some(CqlValue::Int(self.data_col_1)),
                Some(CqlValue::Boolean(self.data_col_2)),
                Some(CqlValue::Timestamp(CqlTimestamp(
                    self.data_col_3.timestamp_millis(),
                ))),
            ],
        }
    }
}

type RowKey = (String, String, String, String);

#[derive(Default)]
struct StoreState {
    keyspaces: HashSet<String>,
    tables: HashSet<String>,
    rows: BTreeMap<RowKey, StoredRow>,
    executed: Vec<Statement>,
    unreachable: bool,
    fail_on_page: Option<usize>,
    fail_inserts_after: Option<usize>,
    /// Appended as-is to the next page served
    injected: Vec<Row>,
    inserts: usize,
    pages_served: usize,
    schema_waits: usize,
}

/// In-memory stand-in for the cluster
pub struct MemoryStore {
    state: Mutex<StoreState>,
    page_size: usize,
}

fn rejected(message: String) -> WidecolError {
    WidecolError::Database {
        message,
        transient: false,
    }
}

fn text(value: Option<&CqlValue>) -> Result<String> {
    match value {
        Some(CqlValue::Text(s)) => Ok(s.clone()),
        other => Err(rejected(format!("expected text, got {:?}", other))),
    }
}

/// `ks.table` named after FROM / INTO / TABLE [IF NOT EXISTS]
fn target_table(cql: &str) -> Option<String> {
    let tokens: Vec<&str> = cql.split_whitespace().collect();
    let at = tokens
        .iter()
        .position(|t| t.eq_ignore_ascii_case("FROM") || t.eq_ignore_ascii_case("INTO"))
        .map(|i| i + 1)
        .or_else(|| {
            tokens
                .iter()
                .position(|t| t.eq_ignore_ascii_case("TABLE"))
                .map(|i| if tokens.get(i + 1).map(|t| t.eq_ignore_ascii_case("IF")).unwrap_or(false) { i + 4 } else { i + 1 })
        })?;
    tokens
        .get(at)
        .map(|t| t.split('(').next().unwrap_or(t).to_ascii_lowercase())
}

fn keyspace_of(cql: &str) -> Option<String> {
    let tokens: Vec<&str> = cql.split_whitespace().collect();
    let i = tokens.iter().position(|t| t.eq_ignore_ascii_case("KEYSPACE"))?;
    let at = if tokens.get(i + 1).map(|t| t.eq_ignore_ascii_case("IF")).unwrap_or(false) {
        i + 4
    } else {
        i + 1
    };
    tokens.get(at).map(|t| t.to_ascii_lowercase())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(5000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            page_size: page_size.max(1),
        }
    }

    /// Every statement fails as if no node could be reached
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// The `n`-th page fetched from now on (1-based) fails
    pub fn fail_on_page(&self, n: usize) {
        let mut state = self.state.lock();
        state.fail_on_page = Some(state.pages_served + n);
    }

    /// Inserts fail once `n` more have succeeded
    pub fn fail_inserts_after(&self, n: usize) {
        let mut state = self.state.lock();
        state.fail_inserts_after = Some(state.inserts + n);
    }

    /// Serve `row` verbatim at the end of the next page, whatever its shape
    pub fn inject_row(&self, row: Row) {
        self.state.lock().injected.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn rows(&self) -> Vec<StoredRow> {
        self.state.lock().rows.values().cloned().collect()
    }

    pub fn executed(&self) -> Vec<Statement> {
        self.state.lock().executed.clone()
    }

    pub fn pages_served(&self) -> usize {
        self.state.lock().pages_served
    }

    pub fn schema_waits(&self) -> usize {
        self.state.lock().schema_waits
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().tables.contains(name)
    }

    fn unreachable_error() -> WidecolError {
        WidecolError::NoHostsAvailable("127.0.0.1:9042: connection refused".to_string())
    }

    fn apply(&self, statement: &Statement) -> Result<()> {
        statement.context.check()?;
        let mut state = self.state.lock();
        state.executed.push(statement.clone());
        if state.unreachable {
            return Err(Self::unreachable_error());
        }
        let cql = statement.cql.trim_start();
        let upper = cql.to_ascii_uppercase();

        if upper.starts_with("CREATE KEYSPACE") {
            let name = keyspace_of(cql).unwrap_or_default();
            if !upper.contains("IF NOT EXISTS") && state.keyspaces.contains(&name) {
                return Err(rejected(format!("Keyspace {} already exists", name)));
            }
            state.keyspaces.insert(name);
            return Ok(());
        }

        if upper.starts_with("CREATE TABLE") {
            let table = target_table(cql).unwrap_or_default();
            let keyspace = table.split('.').next().unwrap_or_default().to_string();
            if !state.keyspaces.contains(&keyspace) {
                return Err(rejected(format!("Keyspace {} does not exist", keyspace)));
            }
            if !upper.contains("IF NOT EXISTS") && state.tables.contains(&table) {
                return Err(rejected(format!("Table {} already exists", table)));
            }
            state.tables.insert(table);
            return Ok(());
        }

        if upper.starts_with("INSERT") {
            let table = target_table(cql).unwrap_or_default();
            if !state.tables.contains(&table) {
                return Err(rejected(format!("unconfigured table {}", table)));
            }
            if let Some(limit) = state.fail_inserts_after {
                if state.inserts >= limit {
                    return Err(WidecolError::Database {
                        message: "Operation timed out - received only 0 responses".to_string(),
                        transient: true,
                    });
                }
            }
            let v = &statement.values;
            let row = StoredRow {
                partition_id: text(v.first())?,
                secondary_id: text(v.get(1))?,
                cluster_col_1: text(v.get(2))?,
                cluster_col_2: text(v.get(3))?,
                data_col_1: match v.get(4) {
                    Some(CqlValue::Int(n)) => *n,
                    _ => 0,
                },
                data_col_2: matches!(v.get(5), Some(CqlValue::Boolean(true))),
                data_col_3: match v.get(6) {
                    Some(CqlValue::Timestamp(ts)) => {
                        DateTime::from_timestamp_millis(ts.0).unwrap_or_else(Utc::now)
                    }
                    _ => Utc::now(),
                },
            };
            let key = (
                row.partition_id.clone(),
                row.secondary_id.clone(),
                row.cluster_col_1.clone(),
                row.cluster_col_2.clone(),
            );
            state.rows.insert(key, row);
            state.inserts += 1;
            return Ok(());
        }

        Err(rejected(format!("unsupported statement: {}", cql)))
    }

    /// Rows from `offset` on, and the offset of the page after, if any
    fn select(&self, statement: &Statement, offset: usize) -> Result<(Vec<Row>, Option<usize>)> {
        statement.context.check()?;
        let mut state = self.state.lock();
        state.executed.push(statement.clone());
        if state.unreachable {
            return Err(Self::unreachable_error());
        }

        let table = target_table(&statement.cql).unwrap_or_default();
        if !state.tables.contains(&table) {
            return Err(rejected(format!("unconfigured table {}", table)));
        }

        state.pages_served += 1;
        if state.fail_on_page == Some(state.pages_served) {
            return Err(rejected(
                "Operation failed - received 0 responses and 1 failures".to_string(),
            ));
        }

        let partition = text(statement.values.first())?;
        let keys: HashSet<String> = statement.values[1..]
            .iter()
            .map(|v| text(Some(v)))
            .collect::<Result<_>>()?;

        let matching: Vec<&StoredRow> = state
            .rows
            .values()
            .filter(|row| row.partition_id == partition && keys.contains(&row.secondary_id))
            .collect();

        let page_size = statement
            .page_size
            .map(|n| n.max(1) as usize)
            .unwrap_or(self.page_size);
        let end = (offset + page_size).min(matching.len());

        let mut rows: Vec<Row> = matching[offset.min(end)..end]
            .iter()
            .map(|row| row.to_row())
            .collect();
        let total = matching.len();
        rows.append(&mut state.injected);

        Ok((rows, (end < total).then_some(end)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset-based paging over a `MemoryStore`
struct MemoryPages<'a> {
    store: &'a MemoryStore,
    statement: Statement,
    /// `None` once the last page was served
    offset: Option<usize>,
}

impl PageSource for MemoryPages<'_> {
    fn next_page(&mut self) -> Result<Option<Vec<Row>>> {
        let offset = match self.offset.take() {
            Some(offset) => offset,
            None => return Ok(None),
        };
        let (rows, next) = self.store.select(&self.statement, offset)?;
        self.offset = next;
        Ok(Some(rows))
    }
}

impl Executor for MemoryStore {
    fn execute(&self, statement: &Statement) -> Result<()> {
        self.apply(statement)
    }

    fn pages<'a>(&'a self, statement: &Statement) -> Result<Box<dyn PageSource + 'a>> {
        Ok(Box::new(MemoryPages {
            store: self,
            statement: statement.clone(),
            offset: Some(0),
        }))
    }

    fn await_schema_agreement(&self) -> Result<()> {
        self.state.lock().schema_waits += 1;
        Ok(())
    }
}

// =============================================================================
// Network Helpers
// =============================================================================

/// An address nothing listens on
pub fn closed_port_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind placeholder listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr
}
