//! Cluster Module
//!
//! A blocking facade over the `scylla` driver: statements with a per-call
//! deadline and cancel token, paged cursors, retries with backoff, and a
//! sink for server-side traces.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Session                           │
//! │   Statement ──► prepare (cached) ──► retry loop          │
//! │                                          │               │
//! │                                          ▼               │
//! │   ┌──────────────────────────────────────────────────┐   │
//! │   │ driver: DefaultPolicy (token-aware, local DC),   │   │
//! │   │ per-host pools, keepalive, paging, tracing info  │   │
//! │   └──────────────────────────────────────────────────┘   │
//! │                        │                                 │
//! │                 RowIter / TraceSink                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything above the session talks to it through the [`Executor`]
//! trait, so the store layer can be exercised against an in-memory fake.

mod iter;
mod retry;
mod session;
mod statement;
mod trace;

pub use iter::{Executor, PageSource, RowIter};
pub use retry::{ExponentialBackoffRetry, RetryDecision, RetryPolicy};
pub use session::{known_nodes, Session};
pub use statement::{Bind, CancelToken, QueryContext, Statement};
pub use trace::{render as render_trace, TraceEvent, TraceReport, TraceSink};
