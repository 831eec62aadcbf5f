//! # widecol
//!
//! A small HTTP front-end over a CQL wide-column cluster (Cassandra /
//! YugabyteDB YCQL), demonstrating partition-aware access:
//! - Pooled, token-aware cluster session (scylla driver) with DC-aware fallback
//! - Idempotent schema creation and bulk seeding of a demo partition
//! - Partition + clustering key lookups streamed through paged cursors
//! - Uniform JSON success/error envelopes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Server                            │
//! │            (acceptor + worker pool, /init /search /find)    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Handler / Envelope                        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌───────────────┐
//!   │   Schema    │          │   Partition   │
//!   │ Initializer │          │ Query Engine  │
//!   └──────┬──────┘          └───────┬───────┘
//!          └────────────┬────────────┘
//!                       ▼  (Executor)
//!               ┌───────────────┐
//!               │    Session    │──► scylla driver ──► nodes
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod cluster;
pub mod http;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cluster::{Executor, QueryContext, Session, Statement};
pub use config::Config;
pub use error::{Result, WidecolError};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of widecol
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
