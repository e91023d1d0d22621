//! Job Store: persistence and atomic state transitions for tasks.
//!
//! [`store::TaskStore`] is the contract the orchestration engine consumes.
//! Two implementations ship here: [`store::PgTaskStore`] backed by
//! PostgreSQL through [`repositories::TaskRepo`], and
//! [`store::InMemoryTaskStore`] for tests and single-node development.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;
pub mod store;

pub use store::{InMemoryTaskStore, PgTaskStore, StoreError, TaskStore};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
