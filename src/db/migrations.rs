//! Database migration handling module
//!
//! Runs embedded migrations using sqlx's built-in migration support.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

/// Embedded migrations from the migrations directory
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Run all pending database migrations in version order.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    MIGRATOR
        .run(pool)
        .await
        .context("Failed to run database migrations")?;

    info!("Database migrations completed successfully");
    Ok(())
}
