//! Request handlers
//!
//! Turns a parsed request into a store call and the store's answer into
//! an enveloped response. Store failures on reads are request-scoped; a
//! failure while initializing the dataset is reported as fatal.

use std::sync::Arc;
use std::time::Duration;

use super::envelope::Envelope;
use super::request::Request;
use super::response::{Response, StatusCode};
use super::router::{route, Route, RouteError};
use crate::cluster::{CancelToken, Executor, QueryContext};
use crate::config::Config;
use crate::error::WidecolError;
use crate::store::{
    PartitionQueryEngine, Record, SchemaInitializer, SecondaryKey, DEFAULT_SEARCH_KEYS,
};

/// A response plus the error that should stop the server, if any
pub struct Reply {
    /// Sent to the client whether or not the reply is fatal
    pub response: Response,
    /// Set only when initialization failed for a reason other than shutdown
    pub fatal: Option<WidecolError>,
}

impl Reply {
    fn ok(records: Vec<Record>) -> Self {
        Self::envelope(StatusCode::Ok, &Envelope::success(records))
    }

    fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::envelope(status, &Envelope::error(message))
    }

    fn envelope(status: StatusCode, envelope: &Envelope) -> Self {
        Self {
            response: Response::json(status, envelope.render()),
            fatal: None,
        }
    }
}

fn status_for(error: &WidecolError) -> StatusCode {
    match error {
        WidecolError::InvalidArgument(_) => StatusCode::BadRequest,
        _ => StatusCode::ServiceUnavailable,
    }
}

/// Serves `/init`, `/search` and `/find` over one shared executor
///
/// One handler is shared by all HTTP workers.
pub struct Handler {
    /// Runs `/search` and `/find`
    engine: PartitionQueryEngine,
    /// Runs `/init`
    initializer: SchemaInitializer,
    /// Rows seeded by `/init` without a numeric `rows` parameter
    default_rows: u64,
    /// Deadline of each read request
    request_timeout: Duration,
    /// Server shutdown flag, shared by every request
    cancel: CancelToken,
}

impl Handler {
    /// Handler over `executor` configured from `config.schema` and `config.http`
    ///
    /// `cancel` is observed by every store call made on behalf of a request.
    pub fn new(executor: Arc<dyn Executor>, config: &Config, cancel: CancelToken) -> Self {
        Self {
            engine: PartitionQueryEngine::new(Arc::clone(&executor), &config.schema),
            initializer: SchemaInitializer::new(executor, config.schema.clone()),
            default_rows: config.schema.default_rows,
            request_timeout: config.http.request_timeout,
            cancel,
        }
    }

    /// Route and serve one request; never fails, errors become envelopes
    pub fn handle(&self, request: &Request) -> Reply {
        tracing::debug!(
            "{} {} params={:?}",
            request.method(),
            request.path(),
            request.params()
        );

        match route(request.method(), request.path()) {
            Ok(Route::Init) => self.init(request),
            Ok(Route::Search) => self.search(request),
            Ok(Route::Find(id)) => self.find(id.as_deref()),
            Err(RouteError::NotFound) => Reply::error(
                StatusCode::NotFound,
                format!("no route for {}", request.path()),
            ),
            Err(RouteError::MethodNotAllowed(allowed)) => {
                let mut reply = Reply::error(
                    StatusCode::MethodNotAllowed,
                    format!("{} is not allowed on {}", request.method(), request.path()),
                );
                reply.response = reply.response.with_header("Allow", allowed.join(", "));
                reply
            }
        }
    }

    fn context(&self) -> QueryContext {
        QueryContext::with_timeout(self.request_timeout).cancel_token(self.cancel.clone())
    }

    /// Seeding is bounded by shutdown only; large datasets outlive any
    /// sensible request timeout
    fn init(&self, request: &Request) -> Reply {
        let rows = request
            .param("rows")
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(self.default_rows as i64);
        let ctx = QueryContext::new().cancel_token(self.cancel.clone());

        match self.initializer.initialize(rows, &ctx) {
            Ok(report) => {
                tracing::info!(
                    "Initialization done: {} rows in {:?}",
                    report.rows_written,
                    report.elapsed
                );
                Reply::ok(Vec::new())
            }
            Err(WidecolError::Cancelled) => {
                tracing::info!("Initialization cancelled by shutdown");
                Reply::error(StatusCode::ServiceUnavailable, "server is shutting down")
            }
            Err(e) => {
                tracing::error!("Initialization failed: {}", e);
                let mut reply = Reply::error(StatusCode::ServiceUnavailable, e.to_string());
                reply.fatal = Some(e);
                reply
            }
        }
    }

    fn search(&self, request: &Request) -> Reply {
        let keys = match request.param("ids") {
            Some(raw) => match SecondaryKey::parse_list(raw) {
                Ok(keys) => keys,
                Err(e) => return Reply::error(status_for(&e), e.to_string()),
            },
            None => PartitionQueryEngine::random_search_keys(DEFAULT_SEARCH_KEYS),
        };

        match self.engine.search(&keys, &self.context()) {
            Ok(records) => Reply::ok(records),
            Err(e) => Reply::error(status_for(&e), e.to_string()),
        }
    }

    fn find(&self, id: Option<&str>) -> Reply {
        let key = SecondaryKey::parse_or_default(id);
        match self.engine.find_by_id(&key, &self.context()) {
            Ok(records) => Reply::ok(records),
            Err(e) => Reply::error(status_for(&e), e.to_string()),
        }
    }
}
