//! Connection seam and normalized result shapes
//!
//! Each driver implements [`Backend`] over its own live connection. The facade in
//! [`super::DriverHandle`] only ever talks to this trait.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};

use super::value::{FromSqlValue, Row, RowIndex, SqlValue};
use crate::error::DbError;

/// Normalized outcome of a non-query statement
///
/// MySQL reports affected rows and the last insert id; Postgres only reports the
/// row count of its command tag, so `last_insert_id` stays `None` there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecSummary {
    pub rows_affected: u64,
    pub last_insert_id: Option<u64>,
}

/// A live connection for one driver
///
/// Implementations must be safe to share across request tasks; the handle
/// performs no locking around query execution.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn execute(&self, query: &str, args: &[SqlValue]) -> Result<ExecSummary, DbError>;

    /// Issue `query` and return a cursor over its rows
    ///
    /// Errors from issuing the statement are returned here; errors decoding
    /// later rows surface from the cursor.
    async fn query(&self, query: &str, args: &[SqlValue]) -> Result<Rows, DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    async fn close(&self);
}

/// Lazy, forward-only row cursor
pub struct Rows {
    inner: BoxStream<'static, Result<Row, DbError>>,
}

impl Rows {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Row, DbError>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    /// Cursor over rows that are already in memory
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(stream::iter(rows.into_iter().map(Ok)))
    }

    /// Advance the cursor
    pub async fn next_row(&mut self) -> Option<Result<Row, DbError>> {
        self.inner.next().await
    }

    /// Drain the remaining rows
    pub async fn collect_all(self) -> Result<Vec<Row>, DbError> {
        self.inner.try_collect().await
    }
}

impl Stream for Rows {
    type Item = Result<Row, DbError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows").finish_non_exhaustive()
    }
}

/// Result of a single-row query
///
/// Holds either the first row or the error hit while fetching it. Nothing is
/// reported until the caller reads from it: a missing row, a failed statement
/// and an uninitialized driver all surface from [`SingleRow::row`] or
/// [`SingleRow::get`], never from issuing the query. Callers that skip reading
/// silently ignore failures.
#[derive(Debug)]
#[must_use = "errors from a single-row query only surface when the row is read"]
pub struct SingleRow {
    outcome: Result<Row, DbError>,
}

impl SingleRow {
    pub(crate) const fn from_outcome(outcome: Result<Row, DbError>) -> Self {
        Self { outcome }
    }

    /// Consume the result, surfacing any deferred error
    pub fn row(self) -> Result<Row, DbError> {
        self.outcome
    }

    /// Decode one column, surfacing any deferred error unchanged
    ///
    /// Use [`SingleRow::row`] to read several columns.
    pub fn get<T: FromSqlValue, I: RowIndex>(self, index: I) -> Result<T, DbError> {
        self.outcome?.get(index)
    }

    /// The deferred error, if fetching the row failed
    pub const fn error(&self) -> Option<&DbError> {
        match &self.outcome {
            Ok(_) => None,
            Err(e) => Some(e),
        }
    }

    pub const fn is_no_rows(&self) -> bool {
        matches!(self.outcome, Err(DbError::NoRows))
    }
}
