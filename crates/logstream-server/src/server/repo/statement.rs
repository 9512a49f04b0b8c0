//! SQL statements over the `logs` table.
//!
//! Every value reaches PostgreSQL as a bind parameter; only fixed SQL text is
//! concatenated.

use logstream_core::types::{LogFilter, NewLog};
use sqlx::{Postgres, QueryBuilder};

pub const SELECT_LOG_BY_ID: &str =
    "SELECT id, source, lvl, message, created_at FROM logs WHERE id = $1";

pub const INSERT_LOG: &str =
    "INSERT INTO logs (source, lvl, message, created_at) VALUES ($1, $2, $3, $4) RETURNING id";

/// Builds the range query for `filter`.
///
/// The time bounds are always present; `source`, `level` and `keyword` add a
/// predicate only when set. Results are ordered by `created_at` then `id` so
/// that streamed output is deterministic.
pub fn select_logs(filter: &LogFilter) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        "SELECT id, source, lvl, message, created_at FROM logs WHERE created_at >= ",
    );
    builder.push_bind(filter.start_time);
    builder.push(" AND created_at <= ");
    builder.push_bind(filter.end_time);

    if let Some(source) = &filter.source {
        builder.push(" AND source = ");
        builder.push_bind(source.as_str());
    }

    if let Some(level) = filter.level {
        builder.push(" AND lvl = ");
        builder.push_bind(level.as_i32());
    }

    if let Some(keyword) = &filter.keyword {
        // strpos instead of LIKE: the keyword is matched literally, so `%` and
        // `_` need no escaping.
        builder.push(" AND strpos(message, ");
        builder.push_bind(keyword.as_str());
        builder.push(") > 0");
    }

    builder.push(" ORDER BY created_at ASC, id ASC");
    builder
}

/// Builds a single multi-row insert returning the generated ids.
///
/// Callers must reject an empty `logs` slice; `VALUES` with no tuples is not
/// valid SQL.
pub fn insert_logs(logs: &[NewLog]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new("INSERT INTO logs (source, lvl, message, created_at) ");
    builder.push_values(logs, |mut row, log| {
        row.push_bind(log.source.as_str())
            .push_bind(log.level)
            .push_bind(log.message.as_str())
            .push_bind(log.created_at);
    });
    builder.push(" RETURNING id");
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use logstream_core::types::Level;

    #[test]
    fn range_query_binds_only_time_bounds_by_default() {
        let filter = LogFilter::between(10_000, 1_000_000);
        let builder = select_logs(&filter);
        assert_eq!(
            builder.sql(),
            "SELECT id, source, lvl, message, created_at FROM logs \
             WHERE created_at >= $1 AND created_at <= $2 \
             ORDER BY created_at ASC, id ASC"
        );
    }

    #[test]
    fn range_query_combines_every_predicate() {
        let filter = LogFilter::between(1, 2)
            .with_source("api")
            .with_level(Level::Warn)
            .with_keyword("disk");
        let builder = select_logs(&filter);
        assert_eq!(
            builder.sql(),
            "SELECT id, source, lvl, message, created_at FROM logs \
             WHERE created_at >= $1 AND created_at <= $2 \
             AND source = $3 AND lvl = $4 AND strpos(message, $5) > 0 \
             ORDER BY created_at ASC, id ASC"
        );
    }

    #[test]
    fn batch_insert_numbers_placeholders_per_row() {
        let logs = vec![
            NewLog::new("api", Level::Info, "first", 1),
            NewLog::new("api", Level::Warn, "second", 2),
        ];
        let builder = insert_logs(&logs);
        let sql = builder.sql();
        assert!(sql.starts_with("INSERT INTO logs (source, lvl, message, created_at) VALUES ("));
        assert!(sql.contains("$4"));
        assert!(sql.contains("$8"));
        assert!(!sql.contains("$9"));
        assert!(sql.ends_with(" RETURNING id"));
    }
}
