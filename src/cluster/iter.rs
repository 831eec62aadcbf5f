//! Paged row cursor
//!
//! `RowIter` pulls pages lazily from a [`PageSource`]. A failed fetch ends
//! iteration quietly; the error is reported by [`RowIter::close`], so
//! callers must drain the iterator and then check `close` before trusting
//! what they read.

use scylla::value::Row;

use super::statement::Statement;
use crate::error::{Result, WidecolError};

/// Successive pages of one statement's result
///
/// The paging state lives inside the source; callers only ask for the
/// next page until there is none.
pub trait PageSource {
    /// The next page, or `None` once the result is exhausted
    fn next_page(&mut self) -> Result<Option<Vec<Row>>>;
}

/// Anything that can run statements: the cluster session, or a fake in tests
pub trait Executor: Send + Sync {
    /// Run a statement whose result is not needed
    fn execute(&self, statement: &Statement) -> Result<()>;

    /// Start a paged read; no page is fetched until asked for
    fn pages<'a>(&'a self, statement: &Statement) -> Result<Box<dyn PageSource + 'a>>;

    /// Wait until every node reports the same schema version
    fn await_schema_agreement(&self) -> Result<()> {
        Ok(())
    }
}

/// Single-pass cursor over all pages of a statement's result
pub struct RowIter<'a> {
    source: Option<Box<dyn PageSource + 'a>>,
    statement: Statement,
    buffered: std::vec::IntoIter<Row>,
    exhausted: bool,
    error: Option<WidecolError>,
    pages: usize,
    rows: usize,
}

impl<'a> RowIter<'a> {
    /// Open a cursor over `statement`; a failure to start shows up in `close`
    pub fn new(executor: &'a dyn Executor, statement: Statement) -> Self {
        let (source, error) = match executor.pages(&statement) {
            Ok(source) => (Some(source), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            source,
            statement,
            buffered: Vec::new().into_iter(),
            exhausted: false,
            error,
            pages: 0,
            rows: 0,
        }
    }

    fn fetch_next_page(&mut self) -> Result<()> {
        self.statement.context.check()?;
        let source = match self.source.as_mut() {
            Some(source) => source,
            None => {
                self.exhausted = true;
                return Ok(());
            }
        };
        match source.next_page()? {
            Some(rows) => {
                self.pages += 1;
                self.buffered = rows.into_iter();
            }
            None => self.exhausted = true,
        }
        Ok(())
    }

    /// Pages fetched so far
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Rows handed out so far
    pub fn rows_read(&self) -> usize {
        self.rows
    }

    /// Release the cursor, reporting the first fetch failure if any
    pub fn close(self) -> Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Iterator for RowIter<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            if let Some(row) = self.buffered.next() {
                self.rows += 1;
                return Some(row);
            }
            if self.exhausted || self.error.is_some() {
                return None;
            }
            if let Err(e) = self.fetch_next_page() {
                tracing::debug!("Cursor stopped after {} page(s): {}", self.pages, e);
                self.error = Some(e);
                return None;
            }
        }
    }
}
