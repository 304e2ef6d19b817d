use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Embedded database schema, applied at startup when tables are missing.
/// This ensures a worker can always initialize its store without external
/// migration files being present.
pub const CONSOLIDATED_SCHEMA: &str = include_str!("../../migrations/consolidated_schema.sql");

/// Open (or create) the engine database and apply the embedded schema.
///
/// `":memory:"` is supported for tests; in that case the pool is pinned to a
/// single connection so every query sees the same database.
pub async fn connect(database_url: &str) -> AppResult<SqlitePool> {
    let in_memory = database_url == ":memory:" || database_url.contains("memory");

    let options = if in_memory {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::DatabaseError(format!("Invalid sqlite options: {e}")))?
    } else {
        SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::DatabaseError(format!("Invalid sqlite options: {e}")))?
            .create_if_missing(true)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 8 })
        .connect_with(options)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to open database: {e}")))?;

    apply_schema(&pool).await?;

    info!("Database ready at {database_url}");
    Ok(pool)
}

/// Apply the embedded consolidated schema. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> AppResult<()> {
    run_statements(pool, CONSOLIDATED_SCHEMA).await
}

/// Execute a multi-statement SQL script. Comment lines are stripped before
/// splitting on ';', so a semicolon inside a `--` comment does not produce a
/// bogus statement fragment.
async fn run_statements(pool: &SqlitePool, script: &str) -> AppResult<()> {
    let stripped: String = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    for statement in stripped.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Schema statement failed: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> std::sync::Arc<SqlitePool> {
    match connect(":memory:").await {
        Ok(pool) => std::sync::Arc::new(pool),
        Err(e) => panic!("failed to open in-memory test database: {e}"),
    }
}
