use anyhow::{Context, Result};
use bds_webhooks::database;
use tracing::info;

pub async fn handle_migrate() -> Result<()> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = database::create_pool(&database_url)?;

    let applied = database::run_migrations(&pool).await?;
    if applied == 0 {
        info!("Database schema is up to date");
    }
    Ok(())
}
