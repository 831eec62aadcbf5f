//! Configuration for widecol
//!
//! Centralized configuration with sensible defaults, a builder, and an
//! environment parser that rejects malformed values instead of silently
//! keeping defaults.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use scylla::statement::{Consistency, SerialConsistency};

use crate::error::{Result, WidecolError};

/// Prefix of every recognized environment variable
pub const ENV_PREFIX: &str = "WIDECOL_";

/// The only native protocol version the driver negotiates
pub const NATIVE_PROTOCOL_VERSION: u8 = 4;

/// Main configuration for a widecol instance
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Cluster session settings
    pub cluster: ClusterConfig,

    /// HTTP front-end settings
    pub http: HttpConfig,

    /// Demo keyspace/table and seeding settings
    pub schema: SchemaConfig,
}

/// Settings for the pooled cluster session
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------
    /// Addresses tried in order for the initial connection
    pub contact_points: Vec<String>,

    /// Native protocol port, shared by every node
    pub port: u16,

    /// Native protocol version; must equal [`NATIVE_PROTOCOL_VERSION`]
    pub protocol_version: u8,

    // -------------------------------------------------------------------------
    // Timeouts
    // -------------------------------------------------------------------------
    /// Bound on the whole initial dial phase, and on each connection attempt
    pub connect_timeout: Duration,

    /// Bound on a single statement round trip
    pub query_timeout: Duration,

    /// Period of TCP keepalive and of the driver's heartbeats on idle
    /// connections; `None` leaves TCP keepalive off and the heartbeat at
    /// the driver's default
    pub keepalive_interval: Option<Duration>,

    // -------------------------------------------------------------------------
    // Statement defaults
    // -------------------------------------------------------------------------
    pub consistency: Consistency,

    /// Applied to conditional statements only
    pub serial_consistency: SerialConsistency,

    /// Rows fetched per page by cursors
    pub page_size: i32,

    // -------------------------------------------------------------------------
    // Routing
    // -------------------------------------------------------------------------
    /// Load balancing prefers replicas and hosts in this datacenter
    pub local_datacenter: Option<String>,

    /// Connections kept open per node
    pub connections_per_host: usize,

    pub retry: RetryConfig,

    /// Where per-statement execution traces are written
    pub trace: TraceTarget,
}

/// Exponential backoff retry settings
///
/// Retries apply to idempotent statements only. Keep `num_retries` low when
/// `query_timeout` is aggressive: every retry during a leader election
/// adds load to a cluster that is already failing to answer, and the
/// retries of many clients compound into a retry storm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub num_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

/// Trace sink destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceTarget {
    Disabled,
    Stdout,
    File(PathBuf),
}

impl FromStr for TraceTarget {
    type Err = WidecolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(WidecolError::Config("empty trace target".to_string())),
            "off" | "none" | "disabled" => Ok(TraceTarget::Disabled),
            "stdout" | "-" => Ok(TraceTarget::Stdout),
            path => Ok(TraceTarget::File(PathBuf::from(path))),
        }
    }
}

/// HTTP front-end settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// TCP listen address
    pub listen_addr: String,

    /// Worker threads serving requests
    pub worker_threads: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,

    /// Deadline handed to every store call made on behalf of a request
    pub request_timeout: Duration,
}

/// Demo schema and seeding settings
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    pub keyspace: String,
    pub table: String,

    /// SimpleStrategy replication factor for the keyspace
    pub replication_factor: u32,

    /// Rows seeded by `/init` when `rows` is absent or not a number
    pub default_rows: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            contact_points: vec!["127.0.0.1".to_string()],
            port: 9042,
            protocol_version: NATIVE_PROTOCOL_VERSION,
            connect_timeout: Duration::from_secs(12),
            query_timeout: Duration::from_secs(12),
            keepalive_interval: Some(Duration::from_secs(10)),
            consistency: Consistency::Quorum,
            serial_consistency: SerialConsistency::Serial,
            page_size: 5000,
            local_datacenter: None,
            connections_per_host: 2,
            retry: RetryConfig::default(),
            trace: TraceTarget::Stdout,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            num_retries: 0,
            min_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            worker_threads: 64,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            keyspace: "demo".to_string(),
            table: "demo".to_string(),
            replication_factor: 1,
            default_rows: 10_000,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Keyspace and table names are interpolated into CQL, so they must be
/// plain unquoted identifiers
fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name.len() > 48 {
        return Err(WidecolError::Config(format!(
            "invalid {} name '{}': expected [A-Za-z][A-Za-z0-9_]{{0,47}}",
            kind, name
        )));
    }
    Ok(())
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let cluster = &self.cluster;
        if cluster.contact_points.is_empty() {
            return Err(WidecolError::Config(
                "at least one contact point is required".to_string(),
            ));
        }
        if cluster.protocol_version != NATIVE_PROTOCOL_VERSION {
            return Err(WidecolError::Config(format!(
                "protocol version {} is not supported (expected {})",
                cluster.protocol_version, NATIVE_PROTOCOL_VERSION
            )));
        }
        if cluster.connect_timeout.is_zero() || cluster.query_timeout.is_zero() {
            return Err(WidecolError::Config(
                "connect and query timeouts must be non-zero".to_string(),
            ));
        }
        if cluster.connections_per_host == 0 {
            return Err(WidecolError::Config(
                "connections per host must be at least 1".to_string(),
            ));
        }
        if self.schema.replication_factor == 0 {
            return Err(WidecolError::Config(
                "replication factor must be at least 1".to_string(),
            ));
        }
        if cluster.page_size <= 0 {
            return Err(WidecolError::Config(format!(
                "page size must be positive, got {}",
                cluster.page_size
            )));
        }
        if cluster.retry.min_backoff > cluster.retry.max_backoff {
            return Err(WidecolError::Config(format!(
                "retry min backoff {:?} exceeds max backoff {:?}",
                cluster.retry.min_backoff, cluster.retry.max_backoff
            )));
        }
        if self.http.worker_threads == 0 {
            return Err(WidecolError::Config(
                "at least one HTTP worker thread is required".to_string(),
            ));
        }
        validate_identifier("keyspace", &self.schema.keyspace)?;
        validate_identifier("table", &self.schema.table)?;
        Ok(())
    }

    // =========================================================================
    // Environment
    // =========================================================================

    /// Build from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build from `(name, value)` pairs
    ///
    /// Only `WIDECOL_*` names are looked at; unknown names are ignored. A
    /// recognized variable with a malformed value is an error.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.as_ref().starts_with(ENV_PREFIX))
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        let env = EnvReader { vars: &vars };

        let mut config = Config::default();
        let cluster = &mut config.cluster;

        if let Some(raw) = env.raw("CONTACT_POINTS") {
            cluster.contact_points = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        env.apply("PORT", &mut cluster.port)?;
        env.apply("PROTOCOL_VERSION", &mut cluster.protocol_version)?;
        env.apply_millis("CONNECT_TIMEOUT_MS", &mut cluster.connect_timeout)?;
        env.apply_millis("QUERY_TIMEOUT_MS", &mut cluster.query_timeout)?;
        if let Some(ms) = env.parse::<u64>("KEEPALIVE_MS")? {
            cluster.keepalive_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        env.apply_with("CONSISTENCY", &mut cluster.consistency, parse_consistency)?;
        env.apply_with(
            "SERIAL_CONSISTENCY",
            &mut cluster.serial_consistency,
            parse_serial_consistency,
        )?;
        if let Some(raw) = env.raw("LOCAL_DC") {
            let dc = raw.trim();
            cluster.local_datacenter = (!dc.is_empty()).then(|| dc.to_string());
        }
        env.apply("CONNECTIONS_PER_HOST", &mut cluster.connections_per_host)?;
        env.apply("RETRY_ATTEMPTS", &mut cluster.retry.num_retries)?;
        env.apply_millis("RETRY_MIN_MS", &mut cluster.retry.min_backoff)?;
        env.apply_millis("RETRY_MAX_MS", &mut cluster.retry.max_backoff)?;
        env.apply("PAGE_SIZE", &mut cluster.page_size)?;
        env.apply("TRACE", &mut cluster.trace)?;

        let http = &mut config.http;
        if let Some(raw) = env.raw("LISTEN_ADDR") {
            http.listen_addr = raw.trim().to_string();
        }
        env.apply("HTTP_WORKERS", &mut http.worker_threads)?;
        env.apply_millis("REQUEST_TIMEOUT_MS", &mut http.request_timeout)?;

        let schema = &mut config.schema;
        if let Some(raw) = env.raw("KEYSPACE") {
            schema.keyspace = raw.trim().to_string();
        }
        if let Some(raw) = env.raw("TABLE") {
            schema.table = raw.trim().to_string();
        }
        env.apply("REPLICATION_FACTOR", &mut schema.replication_factor)?;
        env.apply("DEFAULT_ROWS", &mut schema.default_rows)?;

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Consistency Names
// =============================================================================

/// Parse a consistency level name such as `quorum` or `LOCAL_ONE`
pub fn parse_consistency(raw: &str) -> Result<Consistency> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "ANY" => Ok(Consistency::Any),
        "ONE" => Ok(Consistency::One),
        "TWO" => Ok(Consistency::Two),
        "THREE" => Ok(Consistency::Three),
        "QUORUM" => Ok(Consistency::Quorum),
        "ALL" => Ok(Consistency::All),
        "LOCAL_QUORUM" => Ok(Consistency::LocalQuorum),
        "EACH_QUORUM" => Ok(Consistency::EachQuorum),
        "LOCAL_ONE" => Ok(Consistency::LocalOne),
        "SERIAL" => Ok(Consistency::Serial),
        "LOCAL_SERIAL" => Ok(Consistency::LocalSerial),
        _ => Err(WidecolError::Config(format!(
            "unknown consistency level '{}'",
            raw.trim()
        ))),
    }
}

/// Parse a serial consistency name: `serial` or `local_serial`
pub fn parse_serial_consistency(raw: &str) -> Result<SerialConsistency> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "SERIAL" => Ok(SerialConsistency::Serial),
        "LOCAL_SERIAL" => Ok(SerialConsistency::LocalSerial),
        _ => Err(WidecolError::Config(format!(
            "unknown serial consistency level '{}'",
            raw.trim()
        ))),
    }
}

/// Typed lookups over the collected `WIDECOL_*` variables
struct EnvReader<'a> {
    vars: &'a HashMap<String, String>,
}

impl EnvReader<'_> {
    fn raw(&self, suffix: &str) -> Option<&str> {
        self.vars
            .get(&format!("{}{}", ENV_PREFIX, suffix))
            .map(String::as_str)
    }

    fn parse<T>(&self, suffix: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(suffix) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                WidecolError::Config(format!("{}{}='{}': {}", ENV_PREFIX, suffix, raw, e))
            }),
        }
    }

    fn apply<T>(&self, suffix: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: Display,
    {
        if let Some(value) = self.parse(suffix)? {
            *target = value;
        }
        Ok(())
    }

    /// Like `apply`, for types parsed by a function rather than `FromStr`
    fn apply_with<T>(
        &self,
        suffix: &str,
        target: &mut T,
        parse: impl Fn(&str) -> Result<T>,
    ) -> Result<()> {
        if let Some(raw) = self.raw(suffix) {
            *target = parse(raw).map_err(|e| {
                WidecolError::Config(format!("{}{}='{}': {}", ENV_PREFIX, suffix, raw, e))
            })?;
        }
        Ok(())
    }

    fn apply_millis(&self, suffix: &str, target: &mut Duration) -> Result<()> {
        if let Some(ms) = self.parse::<u64>(suffix)? {
            *target = Duration::from_millis(ms);
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from an existing config (e.g. one read from the environment)
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Set the contact points tried for the initial connection
    pub fn contact_points<I, S>(mut self, points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.cluster.contact_points = points.into_iter().map(Into::into).collect();
        self
    }

    /// Set the native protocol port
    pub fn port(mut self, port: u16) -> Self {
        self.config.cluster.port = port;
        self
    }

    /// Set the native protocol version
    pub fn protocol_version(mut self, version: u8) -> Self {
        self.config.cluster.protocol_version = version;
        self
    }

    /// Set the initial dial timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.cluster.connect_timeout = timeout;
        self
    }

    /// Set the per-statement timeout
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.cluster.query_timeout = timeout;
        self
    }

    /// Set (or disable) the keepalive interval
    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.cluster.keepalive_interval = interval;
        self
    }

    /// Set the default consistency level
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.config.cluster.consistency = consistency;
        self
    }

    /// Set the local datacenter preferred by load balancing
    pub fn local_datacenter(mut self, dc: impl Into<String>) -> Self {
        self.config.cluster.local_datacenter = Some(dc.into());
        self
    }

    /// Set the pool size per node
    pub fn connections_per_host(mut self, count: usize) -> Self {
        self.config.cluster.connections_per_host = count;
        self
    }

    /// Set the replication factor of the demo keyspace
    pub fn replication_factor(mut self, rf: u32) -> Self {
        self.config.schema.replication_factor = rf;
        self
    }

    /// Set the retry policy parameters
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.cluster.retry = retry;
        self
    }

    /// Set the cursor page size
    pub fn page_size(mut self, page_size: i32) -> Self {
        self.config.cluster.page_size = page_size;
        self
    }

    /// Set the trace sink destination
    pub fn trace(mut self, target: TraceTarget) -> Self {
        self.config.cluster.trace = target;
        self
    }

    /// Set the HTTP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.http.listen_addr = addr.into();
        self
    }

    /// Set the number of HTTP worker threads
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.http.worker_threads = count;
        self
    }

    /// Set the per-request store deadline
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.request_timeout = timeout;
        self
    }

    /// Set the demo keyspace name
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.config.schema.keyspace = keyspace.into();
        self
    }

    /// Set the demo table name
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.schema.table = table.into();
        self
    }

    /// Set the default seed row count
    pub fn default_rows(mut self, rows: u64) -> Self {
        self.config.schema.default_rows = rows;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
