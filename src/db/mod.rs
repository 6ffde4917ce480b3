//! Database access layer
//!
//! Plain factory functions and per-table query modules. Pools are created by
//! the caller and passed explicitly; nothing in here holds static state.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::time::Duration;

use crate::config::DatabaseConfig;

pub mod assignments;
pub mod definitions;
pub mod events;
pub mod instances;

#[cfg(test)]
pub mod test_helpers;

/// Create a pool from the `SIGNOFF_DATABASE_URL` environment variable.
pub async fn create_pool() -> Result<PgPool> {
    let database_url = env::var("SIGNOFF_DATABASE_URL")
        .context("SIGNOFF_DATABASE_URL environment variable not set")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Create a pool from a loaded database configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .clone()
        .context("database URL is not configured")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Run database migrations
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;

    Ok(())
}

/// Check whether the schema has been migrated.
pub async fn check_initialized(pool: &PgPool) -> Result<bool> {
    let table: Option<String> =
        sqlx::query_scalar("SELECT to_regclass('workflow_definitions')::text")
            .fetch_one(pool)
            .await
            .context("Failed to check database initialization")?;

    Ok(table.is_some())
}
