//! Database connection pool, migrations, and health check.
//!
//! The Postgres `dependencytracking` table is the durable home of every
//! tracker; see [`tracking`] for the `TrackingStore` implementation.

pub mod tracking;

use std::time::Duration;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const MAX_CONNECTIONS: u32 = 10;

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Fails unless the tracking table is reachable.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1 FROM dependencytracking LIMIT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
