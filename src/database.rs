use anyhow::{Context, Result};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

use crate::web::PgPool;

// Embed migrations at compile time
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

/// Webhook writes all come from the single queue worker; the rest of the
/// pool serves idempotency checks on the request path.
const POOL_MAX_SIZE: u32 = 10;

pub fn create_pool(database_url: &str) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(POOL_MAX_SIZE)
        .build(manager)
        .context("Failed to create database connection pool")?;
    info!("Database connection pool created");
    Ok(pool)
}

/// Apply pending embedded migrations; returns how many ran
pub async fn run_migrations(pool: &PgPool) -> Result<usize> {
    let pool = pool.clone();
    let applied = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        Ok::<usize, anyhow::Error>(applied.len())
    })
    .await??;

    info!("Applied {} database migration(s)", applied);
    Ok(applied)
}
