//! Trace Sink
//!
//! Writes the server-side execution trace of traced statements in a
//! human-readable form:
//!
//! ```text
//! Tracing session 5c6bc0e0-... (coordinator: 10.0.0.1, duration: 1234us):
//!   10.0.0.1 [Native-Transport-Requests-1] Parsing SELECT ... (105us)
//!   10.0.0.2 [ReadStage-2] Executing single-partition query (380us)
//! ```
//!
//! The session fills a [`TraceReport`] from the driver's tracing info;
//! this module only renders it.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::IpAddr;

use parking_lot::Mutex;

use crate::config::TraceTarget;
use crate::error::Result;

/// One traced request, as recorded in `system_traces`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceReport {
    /// Tracing session id
    pub id: String,
    /// `None` when the session row was not written yet
    pub coordinator: Option<IpAddr>,
    /// Total duration in microseconds
    pub duration_us: Option<i32>,
    /// Steps in the order the nodes recorded them
    pub events: Vec<TraceEvent>,
}

/// One step of a traced request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceEvent {
    /// Node that ran the step
    pub source: Option<IpAddr>,
    /// Server thread, e.g. `ReadStage-2`
    pub thread: String,
    pub activity: String,
    /// Microseconds since the request reached `source`
    pub elapsed_us: Option<i32>,
}

/// Destination for rendered traces
pub struct TraceSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TraceSink {
    /// Open the sink for `target`; `Disabled` yields `None`
    pub fn open(target: &TraceTarget) -> Result<Option<Self>> {
        let out: Box<dyn Write + Send> = match target {
            TraceTarget::Disabled => return Ok(None),
            TraceTarget::Stdout => Box::new(io::stdout()),
            TraceTarget::File(path) => Box::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            ),
        };
        Ok(Some(Self::from_writer(out)))
    }

    /// Sink over any writer
    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Render and write one trace; write failures are logged, not returned
    pub fn write_trace(&self, report: &TraceReport) {
        let block = render(report);
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(block.as_bytes()).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write trace {}: {}", report.id, e);
        }
    }
}

fn ip_or_unknown(ip: Option<IpAddr>) -> String {
    ip.map(|ip| ip.to_string())
        .unwrap_or_else(|| "?".to_string())
}

/// Text block for one trace, ending in a newline
pub fn render(report: &TraceReport) -> String {
    let mut block = String::new();

    if report.coordinator.is_none() && report.events.is_empty() {
        let _ = writeln!(block, "Tracing session {} (not yet available)", report.id);
        return block;
    }

    let _ = writeln!(
        block,
        "Tracing session {} (coordinator: {}, duration: {}us):",
        report.id,
        ip_or_unknown(report.coordinator),
        report.duration_us.unwrap_or(0)
    );
    for event in &report.events {
        let _ = writeln!(
            block,
            "  {} [{}] {} ({}us)",
            ip_or_unknown(event.source),
            event.thread,
            event.activity,
            event.elapsed_us.unwrap_or(0)
        );
    }
    block
}
