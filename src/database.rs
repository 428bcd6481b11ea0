//! Database connection pool and utilities
//!
//! Provides the PostgreSQL connection pool with:
//! - Configurable pool sizes and timeouts
//! - Health checking
//! - Transaction scope for batch writes
//! - Embedded migrations
//! - Retry helper for transient failures

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, Postgres};
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const SLOW_STATEMENT: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Connection pool handle owned by `main`
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(config))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self {
            pool: create_pool(config).await?,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        health_check(&self.pool).await
    }

    /// Close all connections; waits for checked-out ones to return
    pub async fn close(&self) {
        info!(
            size = self.pool.size(),
            idle = self.pool.num_idle(),
            "Closing database connection pool"
        );
        self.pool.close().await;
    }
}

/// Run a trivial query against the pool
pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Database {
            message: format!("Health check failed: {}", e).into(),
            source: Some(e),
        })?;
    Ok(())
}

/// Build the pool: statement cache, statement logging through `log`, slow query warnings
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    debug!(
        max = config.max_connections,
        min = config.min_connections,
        connect_timeout = ?config.connect_timeout,
        "Creating database connection pool"
    );

    let connect_options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| Error::Config {
            message: format!("Invalid database URL: {}", e).into(),
            source: None,
        })?
        .statement_cache_capacity(config.statement_cache_size)
        .log_statements(log::LevelFilter::Debug)
        .log_slow_statements(log::LevelFilter::Warn, SLOW_STATEMENT);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(Some(config.idle_timeout))
        .max_lifetime(Some(config.max_lifetime))
        .connect_with(connect_options)
        .await
        .map_err(|e| Error::Database {
            message: format!("Failed to create connection pool: {}", e).into(),
            source: Some(e),
        })?;

    info!(size = pool.size(), "Database connection pool created");
    Ok(pool)
}

/// Transaction scope; anything not committed is rolled back on drop
pub struct Transaction<'a> {
    tx: sqlx::Transaction<'a, Postgres>,
}

impl<'a> Transaction<'a> {
    pub async fn begin(pool: &'a PgPool) -> Result<Self> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Connection to run statements on inside the transaction
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

/// Run database migrations
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Migration(e.to_string()))?;

    info!("Database migrations completed successfully");
    Ok(())
}

/// Run `operation` up to `max_attempts` times, backing off between retryable failures.
///
/// Non-retryable errors are returned immediately.
pub async fn with_retry<T, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %e, "Retrying database operation");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
