//! Storage access for log records.
//!
//! The gRPC layer depends only on [`LogRepository`]. The PostgreSQL
//! implementation in [`postgres`] exposes each statement as a method that
//! takes its execution handle explicitly (the pool, a connection, or an open
//! transaction), so callers decide where a statement runs instead of relying
//! on state smuggled through the call.
//!
//! ## Structure
//!
//! - [`postgres`] - `PgRepository`, statement execution and transactions.
//! - [`statement`] - SQL text and parameter binding.

pub mod postgres;
pub mod statement;

#[cfg(test)]
pub mod memory;

use logstream_core::{
    Result,
    types::{LogFilter, LogRecord, NewLog},
};

/// Read and insert operations over stored log records.
///
/// Records are never updated or deleted through this interface.
#[tonic::async_trait]
pub trait LogRepository: Send + Sync + 'static {
    /// Fetches a single record.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no record has this id, [`Error::Internal`] on
    /// any storage fault.
    ///
    /// [`Error::NotFound`]: logstream_core::Error::NotFound
    /// [`Error::Internal`]: logstream_core::Error::Internal
    async fn get_log(&self, id: i32) -> Result<LogRecord>;

    /// Returns every record matching `filter`, oldest first (`created_at`,
    /// then `id`). No match is an empty vector, not an error.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>>;

    /// Inserts one record and returns its assigned id.
    async fn add_log(&self, log: &NewLog) -> Result<i32>;

    /// Inserts all records atomically and returns their ids in input order.
    async fn add_logs(&self, logs: &[NewLog]) -> Result<Vec<i32>>;
}
