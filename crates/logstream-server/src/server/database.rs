use crate::server::config::ServerConfig;
use anyhow::Context;
use sqlx::{PgPool, postgres::PgPoolOptions};

/// DDL for the `logs` table and its range-query index. Idempotent.
pub const SCHEMA: &str = include_str!("../../schema/logs.sql");

/// Opens the shared connection pool and, when configured, creates the schema.
///
/// The pool establishes one connection eagerly so a bad `DATABASE_URL` fails
/// startup instead of the first request.
pub async fn connect(config: &ServerConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Connected to PostgreSQL"
    );

    if config.init_schema {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("failed to initialize schema")?;
        tracing::info!("Schema initialized");
    }

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_matches_repository_columns() {
        for column in ["id", "source", "lvl", "message", "created_at"] {
            assert!(SCHEMA.contains(column), "missing column {column}");
        }
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS logs"));
    }
}
