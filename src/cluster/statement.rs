//! Statements and per-call context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use scylla::statement::{Consistency, SerialConsistency};
use scylla::value::{CqlTimestamp, CqlValue};

use crate::error::{Result, WidecolError};

/// Shared cancellation flag
///
/// Clones observe the same flag. The HTTP server hands its shutdown flag
/// to every request this way.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline and cancellation carried by every store call
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl QueryContext {
    /// No deadline, never cancelled
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail if cancelled or past the deadline
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(WidecolError::Cancelled);
        }
        match self.remaining() {
            Some(left) if left.is_zero() => Err(WidecolError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// `timeout` capped by the remaining deadline
    pub fn cap(&self, timeout: Duration) -> Result<Duration> {
        self.check()?;
        Ok(match self.remaining() {
            Some(left) => timeout.min(left),
            None => timeout,
        })
    }
}

/// A CQL statement with its execution options
///
/// Options left as `None` fall back to the session's execution profile.
/// Statements with bound values are prepared before they run, which is
/// what lets the driver route them to a replica of their partition.
#[derive(Debug, Clone)]
pub struct Statement {
    /// CQL text, with `?` markers for the bound values
    pub cql: String,
    /// Positional values, in marker order
    pub values: Vec<CqlValue>,
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<SerialConsistency>,
    /// Rows per page for paged reads
    pub page_size: Option<i32>,
    /// Only idempotent statements are ever retried
    pub idempotent: bool,
    /// `Some(false)` keeps the statement out of the trace sink
    pub tracing: Option<bool>,
    /// Deadline and cancellation of the call this statement belongs to
    pub context: QueryContext,
}

impl Statement {
    pub fn new(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            values: Vec::new(),
            consistency: None,
            serial_consistency: None,
            page_size: None,
            idempotent: false,
            tracing: None,
            context: QueryContext::new(),
        }
    }

    /// Bind the next positional value
    pub fn bind(mut self, value: impl Into<Bind>) -> Self {
        self.values.push(value.into().0);
        self
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn serial_consistency(mut self, consistency: SerialConsistency) -> Self {
        self.serial_consistency = Some(consistency);
        self
    }

    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn tracing(mut self, enabled: bool) -> Self {
        self.tracing = Some(enabled);
        self
    }

    pub fn context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }
}

/// A value accepted by [`Statement::bind`]
#[derive(Debug, Clone, PartialEq)]
pub struct Bind(pub CqlValue);

impl From<CqlValue> for Bind {
    fn from(value: CqlValue) -> Self {
        Self(value)
    }
}

impl From<&str> for Bind {
    fn from(value: &str) -> Self {
        Self(CqlValue::Text(value.to_string()))
    }
}

impl From<String> for Bind {
    fn from(value: String) -> Self {
        Self(CqlValue::Text(value))
    }
}

impl From<i32> for Bind {
    fn from(value: i32) -> Self {
        Self(CqlValue::Int(value))
    }
}

impl From<bool> for Bind {
    fn from(value: bool) -> Self {
        Self(CqlValue::Boolean(value))
    }
}

impl From<DateTime<Utc>> for Bind {
    fn from(value: DateTime<Utc>) -> Self {
        Self(CqlValue::Timestamp(CqlTimestamp(value.timestamp_millis())))
    }
}
