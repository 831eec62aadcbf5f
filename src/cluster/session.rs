//! Cluster Session
//!
//! The long-lived, shareable entry point to the cluster, built on the
//! `scylla` driver. The driver is async; the session owns a small tokio
//! runtime and exposes a blocking API so the HTTP workers can stay plain
//! threads.
//!
//! ```text
//!  worker thread ──► Session::execute / RowIter
//!                         │ block_on
//!                         ▼
//!               ┌───────────────────┐
//!               │  retry + deadline │  (ours)
//!               └─────────┬─────────┘
//!                         ▼
//!               ┌───────────────────┐
//!               │   driver session  │  token-aware DefaultPolicy,
//!               │  (tokio runtime)  │  per-host pools, paging, tracing
//!               └───────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use scylla::client::execution_profile::ExecutionProfile;
use scylla::client::session::Session as DriverSession;
use scylla::client::session_builder::SessionBuilder;
use scylla::client::PoolSize;
use scylla::policies::load_balancing::DefaultPolicy;
use scylla::policies::retry::FallthroughRetryPolicy;
use scylla::response::query_result::QueryResult;
use scylla::response::PagingState;
use scylla::statement::prepared::PreparedStatement;
use scylla::statement::unprepared::Statement as CqlStatement;
use scylla::value::Row;
use tokio::runtime::{self, Runtime};

use super::iter::{Executor, PageSource, RowIter};
use super::retry::{ExponentialBackoffRetry, RetryDecision, RetryPolicy};
use super::statement::{QueryContext, Statement};
use super::trace::{TraceEvent, TraceReport, TraceSink};
use crate::config::ClusterConfig;
use crate::error::{Result, WidecolError};

/// How often an in-flight call looks at its cancel token
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Pooled, token-aware session over every node of the cluster
///
/// `Send + Sync`; share it through an `Arc`. Blocking methods must not be
/// called from inside an async context.
pub struct Session {
    /// `None` only while dropping
    driver: Option<DriverSession>,
    /// Runs the driver's connection tasks; every blocking call enters it
    runtime: Runtime,
    /// Settings the session was built from
    config: ClusterConfig,
    /// Prepared statements by CQL text
    prepared: Mutex<HashMap<String, PreparedStatement>>,
    /// Decides whether a failed attempt is re-sent
    retry: Box<dyn RetryPolicy>,
    /// Receives traces of traced statements; `None` disables tracing
    trace: Option<TraceSink>,
}

impl Session {
    /// Connect to the cluster through its contact points
    ///
    /// The whole connect phase is bounded by `connect_timeout`. When no
    /// contact point answers in time the error is `NoHostsAvailable`.
    pub fn connect(config: ClusterConfig) -> Result<Self> {
        let trace = TraceSink::open(&config.trace)?;
        Self::connect_with_trace(config, trace)
    }

    /// Like [`Session::connect`] with an explicit trace sink
    pub fn connect_with_trace(config: ClusterConfig, trace: Option<TraceSink>) -> Result<Self> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("widecol-driver")
            .build()?;

        let per_host = NonZeroUsize::new(config.connections_per_host).ok_or_else(|| {
            WidecolError::Config("connections per host must be at least 1".to_string())
        })?;
        let nodes = known_nodes(&config);

        let mut builder = SessionBuilder::new()
            .known_nodes(&nodes)
            .connection_timeout(config.connect_timeout)
            .pool_size(PoolSize::PerHost(per_host))
            .schema_agreement_timeout(config.query_timeout)
            .default_execution_profile_handle(execution_profile(&config).into_handle());
        if let Some(interval) = config.keepalive_interval {
            builder = builder
                .tcp_keepalive_interval(interval)
                .keepalive_interval(interval);
        }

        let connect_timeout = config.connect_timeout;
        let driver = runtime.block_on(async {
            match tokio::time::timeout(connect_timeout, builder.build()).await {
                Ok(built) => built.map_err(WidecolError::from),
                Err(_) => Err(WidecolError::NoHostsAvailable(format!(
                    "no contact point answered within {:?} ({})",
                    connect_timeout,
                    nodes.join(", ")
                ))),
            }
        })?;

        tracing::info!(
            "Session ready: {} host(s), consistency={:?}, local_dc={}, tracing={}",
            driver.get_cluster_state().get_nodes_info().len(),
            config.consistency,
            config.local_datacenter.as_deref().unwrap_or("-"),
            trace.is_some()
        );

        let retry = ExponentialBackoffRetry::new(config.retry);
        Ok(Self {
            driver: Some(driver),
            runtime,
            config,
            prepared: Mutex::new(HashMap::new()),
            retry: Box::new(retry),
            trace,
        })
    }

    /// Settings the session was built from
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Nodes currently known to the driver
    pub fn known_hosts(&self) -> usize {
        self.driver
            .as_ref()
            .map(|driver| driver.get_cluster_state().get_nodes_info().len())
            .unwrap_or(0)
    }

    /// Lazily paged cursor over a statement's rows
    pub fn query_iter(&self, statement: Statement) -> RowIter<'_> {
        RowIter::new(self, statement)
    }

    fn driver(&self) -> Result<&DriverSession> {
        self.driver
            .as_ref()
            .ok_or_else(|| WidecolError::NoHostsAvailable("session is closed".to_string()))
    }

    fn traced(&self, statement: &Statement) -> bool {
        self.trace.is_some() && statement.tracing != Some(false)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The driver spawns its connection tasks on this runtime
        let _guard = self.runtime.enter();
        drop(self.driver.take());
        tracing::debug!("Session closed");
    }
}

impl Executor for Session {
    fn execute(&self, statement: &Statement) -> Result<()> {
        self.runtime.block_on(self.run_unpaged(statement))
    }

    fn pages<'a>(&'a self, statement: &Statement) -> Result<Box<dyn PageSource + 'a>> {
        let prepared = self.runtime.block_on(self.prepare(statement))?;
        Ok(Box::new(DriverPages {
            session: self,
            statement: statement.clone(),
            prepared,
            state: Some(PagingState::start()),
        }))
    }

    fn await_schema_agreement(&self) -> Result<()> {
        let driver = self.driver()?;
        let version = self
            .runtime
            .block_on(driver.await_schema_agreement())
            .map_err(|e| {
                WidecolError::Schema(format!(
                    "schema versions did not converge within {:?}: {}",
                    self.config.query_timeout, e
                ))
            })?;
        tracing::debug!("Schema agreement on version {}", version);
        Ok(())
    }
}

// =============================================================================
// Connect
// =============================================================================

/// `host:port` for every contact point, adding the configured port where
/// a point does not carry its own
pub fn known_nodes(config: &ClusterConfig) -> Vec<String> {
    config
        .contact_points
        .iter()
        .map(|point| node_address(point.trim(), config.port))
        .collect()
}

fn node_address(point: &str, port: u16) -> String {
    if point.parse::<SocketAddr>().is_ok() {
        return point.to_string();
    }
    if let Ok(ip) = point.parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }
    match point.rsplit_once(':') {
        Some((_, p)) if p.parse::<u16>().is_ok() => point.to_string(),
        _ => format!("{}:{}", point, port),
    }
}

/// Statement defaults: consistency, timeouts and load balancing
///
/// Load balancing is token-aware and prefers the local datacenter when
/// one is configured. The driver never retries by itself; retries are
/// decided by the session's own retry loop.
fn execution_profile(config: &ClusterConfig) -> ExecutionProfile {
    let mut balancing = DefaultPolicy::builder().token_aware(true);
    if let Some(dc) = &config.local_datacenter {
        balancing = balancing
            .prefer_datacenter(dc.clone())
            .permit_dc_failover(true);
    }

    ExecutionProfile::builder()
        .consistency(config.consistency)
        .serial_consistency(Some(config.serial_consistency))
        .request_timeout(Some(config.query_timeout))
        .load_balancing_policy(balancing.build())
        .retry_policy(Arc::new(FallthroughRetryPolicy::new()))
        .build()
}

// =============================================================================
// Execution
// =============================================================================

impl Session {
    /// Run `attempt` until it succeeds or the retry policy gives up
    ///
    /// Every attempt is bounded by the statement's deadline and stops
    /// early when its cancel token fires.
    async fn with_retries<T, F, Fut>(&self, statement: &Statement, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            let error = match bounded(&statement.context, attempt()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if matches!(
                error,
                WidecolError::Cancelled | WidecolError::DeadlineExceeded
            ) {
                return Err(error);
            }

            // A timeout cut short by the request deadline is the deadline's fault
            if let WidecolError::Timeout(_) = error {
                statement.context.check()?;
            }

            match self.retry.decide(statement, &error, retries) {
                RetryDecision::Retry(delay) => {
                    retries += 1;
                    tracing::warn!(
                        "Retry {} of '{}' in {:?}: {}",
                        retries,
                        statement.cql,
                        delay,
                        error
                    );
                    let delay = statement
                        .context
                        .remaining()
                        .map(|left| left.min(delay))
                        .unwrap_or(delay);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DontRetry => return Err(error),
            }
        }
    }

    /// Prepared form of `statement`, configured with its options
    async fn prepare(&self, statement: &Statement) -> Result<PreparedStatement> {
        let timeout = statement.context.cap(self.config.query_timeout)?;
        let cached = self.prepared.lock().get(&statement.cql).cloned();

        let mut prepared = match cached {
            Some(prepared) => prepared,
            None => {
                let driver = self.driver()?;
                let cql = statement.cql.as_str();
                let prepared = self
                    .with_retries(statement, move || async move {
                        driver.prepare(cql).await.map_err(WidecolError::from)
                    })
                    .await?;
                self.prepared
                    .lock()
                    .insert(statement.cql.clone(), prepared.clone());
                prepared
            }
        };

        if let Some(consistency) = statement.consistency {
            prepared.set_consistency(consistency);
        }
        if let Some(serial) = statement.serial_consistency {
            prepared.set_serial_consistency(Some(serial));
        }
        prepared.set_page_size(statement.page_size.unwrap_or(self.config.page_size).max(1));
        prepared.set_is_idempotent(statement.idempotent);
        prepared.set_tracing(self.traced(statement));
        prepared.set_request_timeout(Some(timeout));
        Ok(prepared)
    }

    /// Statements without values skip preparation
    fn unprepared(&self, statement: &Statement) -> Result<CqlStatement> {
        let timeout = statement.context.cap(self.config.query_timeout)?;
        let mut query = CqlStatement::new(statement.cql.as_str());
        if let Some(consistency) = statement.consistency {
            query.set_consistency(consistency);
        }
        if let Some(serial) = statement.serial_consistency {
            query.set_serial_consistency(Some(serial));
        }
        query.set_is_idempotent(statement.idempotent);
        query.set_tracing(self.traced(statement));
        query.set_request_timeout(Some(timeout));
        Ok(query)
    }

    async fn run_unpaged(&self, statement: &Statement) -> Result<()> {
        let driver = self.driver()?;

        let result = if statement.values.is_empty() {
            let query = &self.unprepared(statement)?;
            self.with_retries(statement, move || async move {
                driver
                    .query_unpaged(query.clone(), ())
                    .await
                    .map_err(WidecolError::from)
            })
            .await?
        } else {
            let prepared = &self.prepare(statement).await?;
            let values = &statement.values;
            self.with_retries(statement, move || async move {
                driver
                    .execute_unpaged(prepared, values)
                    .await
                    .map_err(WidecolError::from)
            })
            .await?
        };

        self.record_trace(&result).await;
        Ok(())
    }

    /// One page starting at `state`, and the state of the page after it
    async fn fetch_page(
        &self,
        statement: &Statement,
        prepared: &PreparedStatement,
        state: PagingState,
    ) -> Result<(Vec<Row>, Option<PagingState>)> {
        let driver = self.driver()?;
        let values = &statement.values;

        let (result, response) = self
            .with_retries(statement, move || {
                let state = state.clone();
                async move {
                    driver
                        .execute_single_page(prepared, values, state)
                        .await
                        .map_err(WidecolError::from)
                }
            })
            .await?;

        self.record_trace(&result).await;
        let next = match response.into_paging_control_flow() {
            ControlFlow::Continue(next) => Some(next),
            ControlFlow::Break(()) => None,
        };
        Ok((rows_of(result)?, next))
    }

    /// Fetch a traced request's session and events and hand them to the sink
    async fn record_trace(&self, result: &QueryResult) {
        let (sink, id) = match (&self.trace, result.tracing_id()) {
            (Some(sink), Some(id)) => (sink, id),
            _ => return,
        };
        let driver = match self.driver() {
            Ok(driver) => driver,
            Err(_) => return,
        };

        match driver.get_tracing_info(&id).await {
            Ok(info) => sink.write_trace(&TraceReport {
                id: id.to_string(),
                coordinator: info.coordinator,
                duration_us: info.duration,
                events: info
                    .events
                    .into_iter()
                    .map(|event| TraceEvent {
                        source: event.source,
                        thread: event.thread.unwrap_or_default(),
                        activity: event.activity.unwrap_or_default(),
                        elapsed_us: event.source_elapsed,
                    })
                    .collect(),
            }),
            Err(e) => tracing::warn!("Could not fetch trace {}: {}", id, e),
        }
    }
}

/// Untyped rows of a result; column checks happen where rows are mapped
fn rows_of(result: QueryResult) -> Result<Vec<Row>> {
    let rows = result
        .into_rows_result()
        .map_err(|e| WidecolError::Column(e.to_string()))?;
    let typed = rows
        .rows::<Row>()
        .map_err(|e| WidecolError::Column(e.to_string()))?;
    let collected: Vec<Row> = typed
        .map(|row| row.map_err(|e| WidecolError::Column(e.to_string())))
        .collect::<Result<_>>()?;
    Ok(collected)
}

/// Bound one attempt by the context's deadline and cancel token
async fn bounded<T>(
    context: &QueryContext,
    attempt: impl Future<Output = Result<T>>,
) -> Result<T> {
    context.check()?;
    let limited = async {
        match context.remaining() {
            Some(left) => tokio::time::timeout(left, attempt)
                .await
                .unwrap_or_else(|_| Err(WidecolError::DeadlineExceeded)),
            None => attempt.await,
        }
    };
    tokio::select! {
        result = limited => result,
        _ = cancelled(context) => Err(WidecolError::Cancelled),
    }
}

async fn cancelled(context: &QueryContext) {
    while !context.is_cancelled() {
        tokio::time::sleep(CANCEL_POLL).await;
    }
}

// =============================================================================
// Paging
// =============================================================================

/// Driver-paged result of one prepared statement
struct DriverPages<'a> {
    session: &'a Session,
    statement: Statement,
    prepared: PreparedStatement,
    /// `None` once the last page was fetched
    state: Option<PagingState>,
}

impl PageSource for DriverPages<'_> {
    fn next_page(&mut self) -> Result<Option<Vec<Row>>> {
        let state = match self.state.take() {
            Some(state) => state,
            None => return Ok(None),
        };
        let (rows, next) = self.session.runtime.block_on(self.session.fetch_page(
            &self.statement,
            &self.prepared,
            state,
        ))?;
        self.state = next;
        Ok(Some(rows))
    }
}
