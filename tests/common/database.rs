//! Disposable PostgreSQL databases for repository tests
//!
//! Each `TestDatabase` creates `bds_test_<random>` next to the database named
//! in `TEST_DATABASE_URL` (default `postgresql://localhost/bds_test`), runs
//! the embedded migrations, and drops it again on `Drop`.
//!
//! Tests using it are `#[ignore]`d; run them with
//! `cargo test -- --ignored` against a live server.

use anyhow::{Context, Result};
use bds_webhooks::database::MIGRATIONS;
use bds_webhooks::web::PgPool;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::MigrationHarness;
use uuid::Uuid;

pub struct TestDatabase {
    db_name: String,
    pool: PgPool,
    admin_url: String,
}

fn base_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/bds_test".to_string())
}

/// Swap the database name (last path segment) in a connection URL
fn with_database(url: &str, db_name: &str) -> String {
    match url.rsplit_once('/') {
        Some((prefix, _)) => format!("{}/{}", prefix, db_name),
        None => url.to_string(),
    }
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let base_url = base_url();
        let admin_url = with_database(&base_url, "postgres");
        let db_name = format!("bds_test_{}", Uuid::new_v4().simple());
        let db_url = with_database(&base_url, &db_name);

        let setup_admin_url = admin_url.clone();
        let setup_db_name = db_name.clone();
        tokio::task::spawn_blocking(move || {
            let mut admin = PgConnection::establish(&setup_admin_url).context(
                "Failed to connect to PostgreSQL for database creation. Is PostgreSQL running?",
            )?;
            diesel::sql_query(format!("CREATE DATABASE {}", setup_db_name))
                .execute(&mut admin)
                .with_context(|| format!("Failed to create database {}", setup_db_name))?;

            let mut conn = PgConnection::establish(&db_url)?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        let manager = ConnectionManager::<PgConnection>::new(with_database(&base_url, &db_name));
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .with_context(|| format!("Failed to create connection pool for {}", db_name))?;

        Ok(Self {
            db_name,
            pool,
            admin_url,
        })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn execute(&self, sql: &str) -> Result<usize> {
        let mut conn = self.pool.get()?;
        Ok(diesel::sql_query(sql).execute(&mut conn)?)
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let admin_url = self.admin_url.clone();
        let db_name = self.db_name.clone();

        // Runs on a plain thread; Drop may be called inside the test runtime
        let handle = std::thread::spawn(move || {
            if let Ok(mut admin) = PgConnection::establish(&admin_url) {
                let _ = diesel::sql_query(format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", db_name))
                    .execute(&mut admin);
            }
        });
        let _ = handle.join();
    }
}
