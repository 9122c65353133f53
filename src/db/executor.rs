//! Statement execution on a leased connection.
//!
//! # Architecture
//!
//! The executor works on a single physical connection, never on the pool.
//! Leasing, timeouts and release/discard decisions belong to
//! [`ConnectionManager`](crate::db::pool::ConnectionManager); this module
//! only streams a statement's results into a [`QueryResult`].
//!
//! Statements without parameters are sent as plain text (the simple query
//! protocol on PostgreSQL) so that utility statements which cannot be
//! prepared still work. Statements with parameters are always bound.
//!
//! With a row limit set, the stream is dropped as soon as one row past the
//! limit arrives and the result is marked `truncated`.

use std::time::Instant;

use futures_util::TryStreamExt;
use serde_json::{Map, Value as JsonValue};

use crate::db::types::{DecodeOptions, RowToJson};
use crate::models::QueryResult;

/// Per-lease execution options derived from the connection settings.
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    /// Cache prepared statements on the connection.
    pub persistent: bool,
    /// Stop collecting after this many rows. `None` collects everything.
    pub row_limit: Option<usize>,
    pub decode: DecodeOptions,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            row_limit: None,
            decode: DecodeOptions::default(),
        }
    }
}

/// Whether an error leaves the physical connection in an unknown state.
///
/// Such connections are discarded instead of being returned to the pool.
pub fn is_connection_fault(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::PoolClosed
    )
}

/// Accumulates the items of a `fetch_many` stream.
struct ResultCollector {
    columns: Vec<String>,
    rows: Vec<Map<String, JsonValue>>,
    rows_affected: u64,
    truncated: bool,
    options: ExecOptions,
    start: Instant,
}

impl ResultCollector {
    fn new(options: ExecOptions) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            truncated: false,
            options,
            start: Instant::now(),
        }
    }

    /// Returns `false` once a row arrives past the limit; that row is dropped.
    fn push_row<R: RowToJson>(&mut self, row: &R) -> bool {
        if self
            .options
            .row_limit
            .is_some_and(|limit| self.rows.len() >= limit)
        {
            self.truncated = true;
            return false;
        }
        if self.columns.is_empty() {
            self.columns = row.column_names();
        }
        self.rows.push(row.to_json_map(self.options.decode));
        true
    }

    fn finish(self) -> QueryResult {
        QueryResult {
            columns: self.columns,
            rows: self.rows,
            rows_affected: self.rows_affected,
            execution_time_ms: u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX),
            truncated: self.truncated,
        }
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Both modules expose the same two functions over their backend's
// connection type.

pub(crate) mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use crate::models::{BoundStatement, QueryParam};
    use sqlx::{Connection, Either, Executor, PgConnection};
    use tracing::warn;

    pub async fn fetch(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        options: ExecOptions,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut collector = ResultCollector::new(options);

        if params.is_empty() {
            let mut stream = (&mut *conn).fetch_many(sql);
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => collector.rows_affected += done.rows_affected(),
                    Either::Right(row) => {
                        if !collector.push_row(&row) {
                            break;
                        }
                    }
                }
            }
        } else {
            let mut query = sqlx::query(sql).persistent(options.persistent);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            let mut stream = (&mut *conn).fetch_many(query);
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => collector.rows_affected += done.rows_affected(),
                    Either::Right(row) => {
                        if !collector.push_row(&row) {
                            break;
                        }
                    }
                }
            }
        }

        Ok(collector.finish())
    }

    /// Run `statements` in one transaction and return the last result.
    pub async fn run_transaction(
        conn: &mut PgConnection,
        statements: &[BoundStatement],
        options: ExecOptions,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut tx = Connection::begin(conn).await?;
        let mut last = QueryResult::default();

        for statement in statements {
            match fetch(&mut tx, &statement.sql, &statement.params, options).await {
                Ok(result) => last = result,
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "Rollback failed");
                    }
                    return Err(e);
                }
            }
        }

        tx.commit().await?;
        Ok(last)
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use crate::models::{BoundStatement, QueryParam};
    use sqlx::{Connection, Either, Executor, SqliteConnection};
    use tracing::warn;

    pub async fn fetch(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        options: ExecOptions,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut collector = ResultCollector::new(options);

        if params.is_empty() {
            let mut stream = (&mut *conn).fetch_many(sql);
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => collector.rows_affected += done.rows_affected(),
                    Either::Right(row) => {
                        if !collector.push_row(&row) {
                            break;
                        }
                    }
                }
            }
        } else {
            let mut query = sqlx::query(sql).persistent(options.persistent);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            let mut stream = (&mut *conn).fetch_many(query);
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => collector.rows_affected += done.rows_affected(),
                    Either::Right(row) => {
                        if !collector.push_row(&row) {
                            break;
                        }
                    }
                }
            }
        }

        Ok(collector.finish())
    }

    /// Run `statements` in one transaction and return the last result.
    pub async fn run_transaction(
        conn: &mut SqliteConnection,
        statements: &[BoundStatement],
        options: ExecOptions,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut tx = Connection::begin(conn).await?;
        let mut last = QueryResult::default();

        for statement in statements {
            match fetch(&mut tx, &statement.sql, &statement.params, options).await {
                Ok(result) => last = result,
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "Rollback failed");
                    }
                    return Err(e);
                }
            }
        }

        tx.commit().await?;
        Ok(last)
    }
}
