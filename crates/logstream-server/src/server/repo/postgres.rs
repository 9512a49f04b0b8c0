//! PostgreSQL implementation of [`LogRepository`].
//!
//! Statement-level methods are generic over [`PgExecutor`], so the same code
//! runs against the shared [`PgPool`], a single connection, or the connection
//! of an open transaction handed out by [`PgRepository::run_in_tx`].

use super::{LogRepository, statement};
use crate::server::config::RowDecodePolicy;
use futures::{TryStreamExt, future::BoxFuture};
use logstream_core::{
    Error, Result,
    types::{Level, LogFilter, LogRecord, NewLog},
};
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool, Row, postgres::PgRow};
use std::sync::Arc;

/// Column layout of the `logs` table.
#[derive(Debug)]
struct LogRow {
    id: i32,
    source: String,
    lvl: i32,
    message: String,
    created_at: i64,
}

impl<'r> FromRow<'r, PgRow> for LogRow {
    fn from_row(row: &'r PgRow) -> core::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            source: row.try_get("source")?,
            lvl: row.try_get("lvl")?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl LogRow {
    fn into_record(self) -> Result<LogRecord> {
        Ok(LogRecord {
            id: self.id,
            source: self.source,
            level: Level::try_from(self.lvl)?,
            message: self.message,
            created_at: self.created_at,
        })
    }

    fn decode(self) -> Result<LogRecord> {
        self.into_record()
            .map_err(|e| Error::internal("failed to decode log row", e))
    }
}

/// Decodes a row into a record. A stored level outside [`Level`] counts as a
/// decode failure.
fn decode_row(row: &PgRow) -> Result<LogRecord> {
    LogRow::from_row(row)
        .map_err(|e| Error::internal("failed to decode log row", e))?
        .decode()
}

/// Collects decoded rows of a range query under a [`RowDecodePolicy`].
///
/// Rows that decode are always kept, in arrival order.
#[derive(Debug)]
struct DecodedRows {
    policy: RowDecodePolicy,
    logs: Vec<LogRecord>,
    skipped: usize,
}

impl DecodedRows {
    const fn new(policy: RowDecodePolicy) -> Self {
        Self {
            policy,
            logs: Vec::new(),
            skipped: 0,
        }
    }

    /// Takes one decoded row. Under [`RowDecodePolicy::Fail`] a decode error
    /// is returned and the query must stop.
    fn push(&mut self, decoded: Result<LogRecord>) -> Result<()> {
        match decoded {
            Ok(log) => self.logs.push(log),
            Err(e) => match self.policy {
                RowDecodePolicy::Skip => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, "Skipping undecodable log row");
                }
                RowDecodePolicy::Fail => return Err(e),
            },
        }
        Ok(())
    }

    fn finish(self) -> Vec<LogRecord> {
        if self.skipped > 0 {
            tracing::warn!(
                skipped = self.skipped,
                returned = self.logs.len(),
                "Range query dropped rows"
            );
        }
        self.logs
    }
}

/// Combines the outcome of transactional work with the outcome of the commit
/// (after success) or rollback (after failure) that ended the transaction.
fn finish_tx<T>(work: Result<T>, end: core::result::Result<(), sqlx::Error>) -> Result<T> {
    match (work, end) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(Error::internal("failed to commit tx", e)),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(rollback)) => Err(Error::TransactionRollback {
            cause: Box::new(err),
            source: Arc::new(rollback),
        }),
    }
}

/// Fails with [`Error::PartialInsert`] unless exactly one id came back per
/// submitted record.
pub(crate) fn check_inserted(expected: usize, ids: Vec<i32>) -> Result<Vec<i32>> {
    if ids.len() != expected {
        return Err(Error::PartialInsert {
            expected,
            inserted: ids.len(),
        });
    }
    Ok(ids)
}

/// Log repository backed by a PostgreSQL connection pool.
#[derive(Clone, Debug)]
pub struct PgRepository {
    pool: PgPool,
    decode_policy: RowDecodePolicy,
}

impl PgRepository {
    pub const fn new(pool: PgPool, decode_policy: RowDecodePolicy) -> Self {
        Self {
            pool,
            decode_policy,
        }
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Looks up a record by id.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] when the statement returns no rows.
    /// - [`Error::Internal`] for any other driver failure or an undecodable
    ///   row.
    pub async fn fetch_log<'e, E>(&self, executor: E, id: i32) -> Result<LogRecord>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query(statement::SELECT_LOG_BY_ID)
            .bind(id)
            .fetch_one(executor)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => Error::not_found(format!("log {id}")),
                other => Error::internal("failed to get log", other),
            })?;

        decode_row(&row)
    }

    /// Runs the range query for `filter`, streaming rows from the driver.
    ///
    /// Rows that fail to decode are dropped with a warning under
    /// [`RowDecodePolicy::Skip`], or fail the query under
    /// [`RowDecodePolicy::Fail`]. Rows that decode are never dropped.
    pub async fn fetch_logs<'e, E>(
        &self,
        executor: E,
        filter: &LogFilter,
    ) -> Result<Vec<LogRecord>>
    where
        E: PgExecutor<'e>,
    {
        let mut builder = statement::select_logs(filter);
        let mut rows = builder.build().fetch(executor);

        let mut decoded = DecodedRows::new(self.decode_policy);
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| Error::internal("failed to get logs", e))?
        {
            decoded.push(decode_row(&row))?;
        }

        Ok(decoded.finish())
    }

    /// Inserts a record and returns the generated id.
    ///
    /// The level is checked before any statement is issued.
    pub async fn insert_log<'e, E>(&self, executor: E, log: &NewLog) -> Result<i32>
    where
        E: PgExecutor<'e>,
    {
        let level = Level::try_from(log.level)?;

        sqlx::query_scalar::<_, i32>(statement::INSERT_LOG)
            .bind(log.source.as_str())
            .bind(level.as_i32())
            .bind(log.message.as_str())
            .bind(log.created_at)
            .fetch_one(executor)
            .await
            .map_err(|e| Error::internal("failed to add log", e))
    }

    /// Inserts every record with one multi-row statement.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyBatch`] for an empty slice, before touching storage.
    /// - [`Error::InvalidLevel`] for the first record with an unknown level,
    ///   before touching storage.
    /// - [`Error::PartialInsert`] when the returned id count differs from the
    ///   input count, even though the statement itself succeeded.
    pub async fn insert_logs<'e, E>(
        &self,
        executor: E,
        logs: &[NewLog],
    ) -> Result<Vec<i32>>
    where
        E: PgExecutor<'e>,
    {
        if logs.is_empty() {
            return Err(Error::EmptyBatch);
        }

        for log in logs {
            Level::try_from(log.level)?;
        }

        let mut builder = statement::insert_logs(logs);
        let ids = builder
            .build_query_scalar::<i32>()
            .fetch_all(executor)
            .await
            .map_err(|e| Error::internal("failed to add logs", e))?;

        check_inserted(logs.len(), ids)
    }

    /// Runs `work` inside a transaction.
    ///
    /// `work` receives the transaction's connection and must issue its
    /// statements through it. The transaction commits when `work` succeeds.
    /// When `work` fails it is rolled back and the original error is
    /// returned; if the rollback fails too, both are returned as
    /// [`Error::TransactionRollback`].
    pub async fn run_in_tx<T, F>(&self, work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::internal("failed to start tx", e))?;

        let result = work(&mut *tx).await;
        let end = if result.is_ok() {
            tx.commit().await
        } else {
            tx.rollback().await
        };

        finish_tx(result, end)
    }
}

#[tonic::async_trait]
impl LogRepository for PgRepository {
    async fn get_log(&self, id: i32) -> Result<LogRecord> {
        self.fetch_log(&self.pool, id).await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>> {
        self.fetch_logs(&self.pool, filter).await
    }

    async fn add_log(&self, log: &NewLog) -> Result<i32> {
        self.insert_log(&self.pool, log).await
    }

    async fn add_logs(&self, logs: &[NewLog]) -> Result<Vec<i32>> {
        // Checked here as well so an empty batch never opens a transaction.
        if logs.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let repo = self.clone();
        let logs = logs.to_vec();
        self.run_in_tx(move |conn| {
            Box::pin(async move { repo.insert_logs(conn, &logs).await })
        })
        .await
    }
}
